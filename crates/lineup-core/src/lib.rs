//! lineup-core — face detection, description and gallery matching.
//!
//! Uses SCRFD for face detection and ArcFace for face description, both
//! running via ONNX Runtime for CPU inference, and a Euclidean
//! nearest-neighbour matcher over an immutable gallery.

pub mod alignment;
pub mod api;
pub mod detector;
pub mod engine;
pub mod recognizer;
pub mod types;

pub use engine::{decode_image, default_model_dir, EngineError, FaceEngine, OnnxEngine};
pub use types::{
    BoundingBox, Classification, Descriptor, DetectionMode, Gallery, GalleryEntry, Identity,
    Matcher, NearestNeighborMatcher, SamplePolicy, DEFAULT_MATCH_THRESHOLD,
};
