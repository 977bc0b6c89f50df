//! Request Orchestrator: image bytes in, identities out.

use crate::adapter::{AdapterError, RecognitionAdapter};
use crate::gallery::ActiveGallery;
use lineup_core::{Classification, DetectionMode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("engine failure: {0}")]
    Engine(String),
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("engine unavailable")]
    Unavailable,
}

impl From<AdapterError> for RecognizeError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Decode(_) => Self::BadInput(e.to_string()),
            AdapterError::ChannelClosed => Self::Unavailable,
            AdapterError::Engine(_) | AdapterError::Storage { .. } | AdapterError::MultipleFaces(_) => {
                Self::Engine(e.to_string())
            }
        }
    }
}

/// Per-request overrides of the service defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecognizeOptions {
    pub multiple: bool,
    pub mode: Option<DetectionMode>,
    pub threshold: Option<f32>,
}

/// Service-level recognition defaults.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionDefaults {
    pub mode: DetectionMode,
    pub threshold: f32,
    pub timeout: Duration,
}

/// Settings after merging request overrides into the defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionSettings {
    pub multiple: bool,
    pub mode: DetectionMode,
    pub threshold: f32,
}

impl RecognitionDefaults {
    pub fn resolve(&self, options: RecognizeOptions) -> Result<RecognitionSettings, RecognizeError> {
        let threshold = options.threshold.unwrap_or(self.threshold);
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(RecognizeError::BadInput(format!(
                "threshold must be a non-negative number, got {threshold}"
            )));
        }
        Ok(RecognitionSettings {
            multiple: options.multiple,
            mode: options.mode.unwrap_or(self.mode),
            threshold,
        })
    }
}

/// Result of one recognition request.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// Single-face request on an image without faces.
    NoFace { gallery_version: u64 },
    /// One classification per face, in detection order, all against the
    /// same gallery version.
    Faces {
        gallery_version: u64,
        matches: Vec<Classification>,
    },
}

#[derive(Clone)]
pub struct Orchestrator {
    adapter: RecognitionAdapter,
    active: Arc<ActiveGallery>,
    defaults: RecognitionDefaults,
}

impl Orchestrator {
    pub fn new(
        adapter: RecognitionAdapter,
        active: Arc<ActiveGallery>,
        defaults: RecognitionDefaults,
    ) -> Self {
        Self {
            adapter,
            active,
            defaults,
        }
    }

    pub fn defaults(&self) -> &RecognitionDefaults {
        &self.defaults
    }

    pub async fn recognize(
        &self,
        image: Vec<u8>,
        options: RecognizeOptions,
    ) -> Result<Recognition, RecognizeError> {
        let settings = self.defaults.resolve(options)?;

        // The engine call itself cannot be interrupted; on timeout we only stop waiting.
        let descriptors = tokio::time::timeout(
            self.defaults.timeout,
            self.adapter
                .embed_from_bytes(image, settings.mode, settings.multiple),
        )
        .await
        .map_err(|_| RecognizeError::Timeout(self.defaults.timeout))??;

        let gallery = self.active.snapshot().await;
        let gallery_version = gallery.version();

        if !settings.multiple && descriptors.is_empty() {
            tracing::debug!(mode = %settings.mode, "recognize: no face");
            return Ok(Recognition::NoFace { gallery_version });
        }

        let matches: Vec<Classification> = descriptors
            .iter()
            .map(|d| self.adapter.classify(d, &gallery, Some(settings.threshold)))
            .collect();

        tracing::debug!(
            mode = %settings.mode,
            multiple = settings.multiple,
            faces = matches.len(),
            identified = matches.iter().filter(|m| m.identity().is_some()).count(),
            gallery_version,
            "recognize: classified"
        );
        Ok(Recognition::Faces {
            gallery_version,
            matches,
        })
    }
}
