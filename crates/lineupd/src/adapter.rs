//! Recognition Engine Adapter.
//!
//! The face engine lives on a dedicated OS thread; async callers talk to it
//! through a cloneable [`RecognitionAdapter`] handle. Decoding happens on the
//! engine thread so request handlers never do CPU-heavy work.

use lineup_core::{
    Classification, Descriptor, DetectionMode, EngineError, FaceEngine, Gallery,
    DEFAULT_MATCH_THRESHOLD,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("cannot read {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),
    #[error("training image contains {0} faces; exactly one is required")]
    MultipleFaces(usize),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Describe {
        image: Vec<u8>,
        mode: DetectionMode,
        multiple: bool,
        reply: oneshot::Sender<Result<Vec<Descriptor>, AdapterError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct RecognitionAdapter {
    tx: mpsc::Sender<EngineRequest>,
}

impl RecognitionAdapter {
    /// Training-time embedding of one sample file.
    ///
    /// `Ok(None)` when the image has no face. A file with several faces is
    /// rejected with [`AdapterError::MultipleFaces`] rather than guessing
    /// which face the label belongs to.
    pub async fn embed_from_file(
        &self,
        path: &Path,
        mode: DetectionMode,
    ) -> Result<Option<Descriptor>, AdapterError> {
        let image = tokio::fs::read(path)
            .await
            .map_err(|source| AdapterError::Storage {
                path: path.to_path_buf(),
                source,
            })?;

        let mut descriptors = self.describe(image, mode, true).await?;
        match descriptors.len() {
            0 => Ok(None),
            1 => Ok(descriptors.pop()),
            n => Err(AdapterError::MultipleFaces(n)),
        }
    }

    /// Request-time embedding of an in-memory image.
    ///
    /// With `multiple == false` at most the primary face is returned;
    /// otherwise one descriptor per face in detection order.
    pub async fn embed_from_bytes(
        &self,
        image: Vec<u8>,
        mode: DetectionMode,
        multiple: bool,
    ) -> Result<Vec<Descriptor>, AdapterError> {
        self.describe(image, mode, multiple).await
    }

    /// Classify against `gallery`; `None` uses the engine default threshold.
    pub fn classify(
        &self,
        descriptor: &Descriptor,
        gallery: &Gallery,
        threshold: Option<f32>,
    ) -> Classification {
        gallery.classify(descriptor, threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD))
    }

    async fn describe(
        &self,
        image: Vec<u8>,
        mode: DetectionMode,
        multiple: bool,
    ) -> Result<Vec<Descriptor>, AdapterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Describe {
                image,
                mode,
                multiple,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AdapterError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AdapterError::ChannelClosed)?
    }
}

/// Spawn `engine` on a dedicated OS thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_engine<E: FaceEngine>(
    mut engine: E,
    queue_depth: usize,
) -> std::io::Result<RecognitionAdapter> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("lineup-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Describe {
                        image,
                        mode,
                        multiple,
                        reply,
                    } => {
                        if reply.is_closed() {
                            tracing::debug!("caller gone before engine call; dropping request");
                            continue;
                        }
                        let result = run_describe(&mut engine, &image, mode, multiple);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(RecognitionAdapter { tx })
}

fn run_describe<E: FaceEngine>(
    engine: &mut E,
    bytes: &[u8],
    mode: DetectionMode,
    multiple: bool,
) -> Result<Vec<Descriptor>, AdapterError> {
    let image = lineup_core::decode_image(bytes)?;
    let mut descriptors = engine.detect_and_describe(&image, mode)?;
    tracing::debug!(
        %mode,
        width = image.width(),
        height = image.height(),
        faces = descriptors.len(),
        "engine: image described"
    );
    if !multiple {
        descriptors.truncate(1);
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{broken_png, descriptor_for, png, FakeEngine};
    use lineup_core::{GalleryEntry, Identity};

    fn adapter() -> RecognitionAdapter {
        spawn_engine(FakeEngine::default(), 4).unwrap()
    }

    #[tokio::test]
    async fn test_bytes_single_returns_primary_face() {
        let faces = adapter()
            .embed_from_bytes(png(&[200, 50]), DetectionMode::Fast, false)
            .await
            .unwrap();
        assert_eq!(faces, vec![descriptor_for(50)]);
    }

    #[tokio::test]
    async fn test_bytes_multiple_returns_every_face() {
        let faces = adapter()
            .embed_from_bytes(png(&[200, 50, 120]), DetectionMode::Accurate, true)
            .await
            .unwrap();
        assert_eq!(
            faces,
            vec![descriptor_for(50), descriptor_for(120), descriptor_for(200)]
        );
    }

    #[tokio::test]
    async fn test_no_face_is_not_an_error() {
        let faces = adapter()
            .embed_from_bytes(png(&[]), DetectionMode::Fast, false)
            .await
            .unwrap();
        assert!(faces.is_empty());
    }

    #[tokio::test]
    async fn test_decode_and_engine_failures_are_distinct() {
        let adapter = adapter();
        let err = adapter
            .embed_from_bytes(b"not an image".to_vec(), DetectionMode::Fast, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Decode(_)));

        let err = adapter
            .embed_from_bytes(broken_png(), DetectionMode::Fast, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Engine(_)));
    }

    #[tokio::test]
    async fn test_file_embedding_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one.png");
        let none = dir.path().join("none.png");
        let two = dir.path().join("two.png");
        std::fs::write(&one, png(&[77])).unwrap();
        std::fs::write(&none, png(&[])).unwrap();
        std::fs::write(&two, png(&[1, 2])).unwrap();

        let adapter = adapter();
        let mode = DetectionMode::Accurate;
        assert_eq!(
            adapter.embed_from_file(&one, mode).await.unwrap(),
            Some(descriptor_for(77))
        );
        assert_eq!(adapter.embed_from_file(&none, mode).await.unwrap(), None);
        assert!(matches!(
            adapter.embed_from_file(&two, mode).await,
            Err(AdapterError::MultipleFaces(2))
        ));
        assert!(matches!(
            adapter.embed_from_file(&dir.path().join("missing.png"), mode).await,
            Err(AdapterError::Storage { .. })
        ));
    }

    #[tokio::test]
    async fn test_classify_uses_default_threshold_when_unset() {
        let gallery = Gallery::new(
            1,
            vec![GalleryEntry {
                identity: Identity::new(4),
                descriptor: Descriptor::new(vec![0.0, 0.0]),
            }],
        );
        let adapter = adapter();
        let probe = Descriptor::new(vec![1.0, 0.0]);

        assert_eq!(
            adapter.classify(&probe, &gallery, None).identity(),
            Some(Identity::new(4))
        );
        assert_eq!(adapter.classify(&probe, &gallery, Some(0.5)).identity(), None);
    }
}
