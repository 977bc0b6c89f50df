//! Detection/embedding engine boundary.
//!
//! [`FaceEngine`] is the contract the service relies on; [`OnnxEngine`]
//! fulfils it with SCRFD detection followed by ArcFace description.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Descriptor, DetectionMode};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("data").join("models")
}

/// Decode an encoded image (any format the `image` crate recognises) to RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Face detection plus descriptor extraction.
///
/// Implementations are synchronous and may be CPU-heavy. They run on a
/// dedicated thread and are never shared between threads concurrently.
pub trait FaceEngine: Send + 'static {
    /// One descriptor per detected face, in the engine's detection order.
    ///
    /// The first descriptor belongs to the engine's primary face. An image
    /// without faces yields an empty vector, never an error.
    fn detect_and_describe(
        &mut self,
        image: &RgbImage,
        mode: DetectionMode,
    ) -> Result<Vec<Descriptor>, EngineError>;
}

/// SCRFD + ArcFace engine backed by ONNX Runtime.
pub struct OnnxEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEngine {
    /// Load both models from `model_dir`. Fails if either is missing or corrupt.
    pub fn load(model_dir: &Path) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        tracing::info!(dir = %model_dir.display(), "face engine ready");
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEngine for OnnxEngine {
    /// Detection order is descending detector confidence.
    fn detect_and_describe(
        &mut self,
        image: &RgbImage,
        mode: DetectionMode,
    ) -> Result<Vec<Descriptor>, EngineError> {
        let faces = self.detector.detect(image, mode)?;
        faces
            .iter()
            .map(|face| self.recognizer.describe(image, face).map_err(EngineError::from))
            .collect()
    }
}
