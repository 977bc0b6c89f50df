//! Active gallery snapshot and the Gallery Builder.

use crate::adapter::{AdapterError, RecognitionAdapter};
use crate::store::{SampleStore, StoreError};
use lineup_core::api::{SampleReport, SampleStatus, TrainResponse};
use lineup_core::{DetectionMode, Gallery, GalleryEntry, SamplePolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("a gallery rebuild is already running")]
    InProgress,
    #[error("sample store: {0}")]
    Store(#[from] StoreError),
    #[error("engine unavailable during rebuild")]
    EngineUnavailable,
}

/// Publication point for the current gallery.
///
/// Readers clone an `Arc` and keep a consistent snapshot for as long as they
/// hold it. Installing replaces the pointer; the old gallery is dropped once
/// its last reader is done.
pub struct ActiveGallery {
    current: RwLock<Arc<Gallery>>,
}

impl ActiveGallery {
    /// Start with the empty version-0 gallery.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Gallery::default())),
        }
    }

    pub async fn snapshot(&self) -> Arc<Gallery> {
        Arc::clone(&*self.current.read().await)
    }

    /// Publish `entries` as the next gallery version.
    pub async fn install(&self, entries: Vec<GalleryEntry>) -> Arc<Gallery> {
        let mut current = self.current.write().await;
        let next = Arc::new(Gallery::new(current.version() + 1, entries));
        *current = Arc::clone(&next);
        next
    }
}

impl Default for ActiveGallery {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a successful rebuild.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub gallery: Arc<Gallery>,
    pub samples: Vec<SampleReport>,
}

impl RebuildReport {
    pub fn count(&self, pred: impl Fn(&SampleStatus) -> bool) -> usize {
        self.samples.iter().filter(|s| pred(&s.status)).count()
    }

    pub fn to_response(&self) -> TrainResponse {
        TrainResponse {
            gallery_version: self.gallery.version(),
            entries: self.gallery.len(),
            samples: self.samples.clone(),
        }
    }
}

/// Regenerates the gallery from the Sample Store.
pub struct GalleryBuilder {
    store: SampleStore,
    adapter: RecognitionAdapter,
    active: Arc<ActiveGallery>,
    mode: DetectionMode,
    policy: SamplePolicy,
    rebuild_lock: Mutex<()>,
    rebuilding: AtomicBool,
}

/// Clears the rebuilding flag however the rebuild ends.
struct RebuildingFlag<'a>(&'a AtomicBool);

impl Drop for RebuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl GalleryBuilder {
    pub fn new(
        store: SampleStore,
        adapter: RecognitionAdapter,
        active: Arc<ActiveGallery>,
        mode: DetectionMode,
        policy: SamplePolicy,
    ) -> Self {
        Self {
            store,
            adapter,
            active,
            mode,
            policy,
            rebuild_lock: Mutex::new(()),
            rebuilding: AtomicBool::new(false),
        }
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    /// Rebuild the gallery from scratch and install it.
    ///
    /// A sample that cannot be embedded is recorded and skipped. Failure to
    /// list the store, or losing the engine, aborts the rebuild and leaves
    /// the active gallery untouched.
    pub async fn rebuild(&self) -> Result<RebuildReport, RebuildError> {
        let _guard = self
            .rebuild_lock
            .try_lock()
            .map_err(|_| RebuildError::InProgress)?;
        self.rebuilding.store(true, Ordering::Release);
        let _flag = RebuildingFlag(&self.rebuilding);

        let listing = self.store.list_identities().await?;
        tracing::info!(
            identities = listing.len(),
            mode = %self.mode,
            policy = %self.policy,
            "gallery rebuild started"
        );

        let mut entries = Vec::new();
        let mut samples = Vec::new();

        for identity_samples in listing {
            let identity = identity_samples.identity;
            let mut has_entry = false;

            for path in identity_samples.samples {
                let report = |status| SampleReport {
                    identity,
                    path: path.display().to_string(),
                    status,
                };

                if has_entry && self.policy == SamplePolicy::First {
                    samples.push(report(SampleStatus::Unused));
                    continue;
                }

                let status = match self.adapter.embed_from_file(&path, self.mode).await {
                    Ok(Some(descriptor)) => {
                        entries.push(GalleryEntry {
                            identity,
                            descriptor,
                        });
                        has_entry = true;
                        tracing::debug!(%identity, path = %path.display(), "sample trained");
                        SampleStatus::Trained
                    }
                    Ok(None) => {
                        tracing::info!(%identity, path = %path.display(), "no face found in sample");
                        SampleStatus::NoFace
                    }
                    Err(AdapterError::ChannelClosed) => return Err(RebuildError::EngineUnavailable),
                    Err(e) => {
                        tracing::warn!(%identity, path = %path.display(), error = %e, "sample skipped");
                        SampleStatus::Skipped {
                            reason: e.to_string(),
                        }
                    }
                };
                samples.push(report(status));
            }
        }

        let gallery = self.active.install(entries).await;
        let report = RebuildReport { gallery, samples };
        tracing::info!(
            version = report.gallery.version(),
            entries = report.gallery.len(),
            identities = report.gallery.identity_count(),
            no_face = report.count(|s| *s == SampleStatus::NoFace),
            skipped = report.count(|s| matches!(s, SampleStatus::Skipped { .. })),
            "gallery installed"
        );
        Ok(report)
    }
}
