//! Sample Store: one directory of raw images per identity under a training root.

use lineup_core::Identity;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot read training root {path}: {source}")]
    ReadRoot { path: PathBuf, source: io::Error },
    #[error("cannot write sample {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("sample payload is empty")]
    EmptySample,
    #[error("sample payload is not a recognised image format")]
    UnrecognisedImage,
}

impl StoreError {
    /// Whether the caller sent something unusable, as opposed to a storage failure.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptySample | Self::UnrecognisedImage)
    }
}

/// All samples of one identity, sorted by file name.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySamples {
    pub identity: Identity,
    pub samples: Vec<PathBuf>,
}

/// Filesystem-backed Sample Store. Holds no in-memory state besides its root.
#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    /// Open the store, creating the training root if it does not exist.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::Write {
                path: root.clone(),
                source,
            })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every identity and its samples, ordered by identity.
    ///
    /// Entries that are not identity directories are logged and skipped.
    /// Only an unreadable root fails the listing.
    pub async fn list_identities(&self) -> Result<Vec<IdentitySamples>, StoreError> {
        let read_root = |source| StoreError::ReadRoot {
            path: self.root.clone(),
            source,
        };
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(read_root)?;

        let mut listing = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(read_root)? {
            let path = entry.path();
            let name = entry.file_name();
            if name.as_encoded_bytes().starts_with(b".") {
                continue;
            }
            let Some(name) = name.to_str() else {
                tracing::warn!(path = %path.display(), "skipping entry with non UTF-8 name");
                continue;
            };

            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => {}
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "skipping non-directory entry in training root");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            }

            let identity: Identity = match name.parse() {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping directory with invalid identity label");
                    continue;
                }
            };

            match list_samples(&path).await {
                Ok(samples) => listing.push(IdentitySamples { identity, samples }),
                Err(e) => {
                    tracing::warn!(%identity, path = %path.display(), error = %e, "skipping unreadable identity directory");
                }
            }
        }

        listing.sort_by_key(|s| s.identity);
        tracing::debug!(
            identities = listing.len(),
            samples = listing.iter().map(|s| s.samples.len()).sum::<usize>(),
            "training root listed"
        );
        Ok(listing)
    }

    /// Store one training image for `identity` and return its path.
    ///
    /// The image lands under a hidden temporary name first and is renamed into
    /// place, so a concurrent listing never sees a partial file.
    pub async fn add_sample(&self, identity: Identity, image: &[u8]) -> Result<PathBuf, StoreError> {
        if image.is_empty() {
            return Err(StoreError::EmptySample);
        }
        let format = image::guess_format(image).map_err(|_| StoreError::UnrecognisedImage)?;
        let extension = format.extensions_str().first().copied().unwrap_or("img");

        let dir = self.root.join(identity.to_string());
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Write { path, source }
        };
        tokio::fs::create_dir_all(&dir).await.map_err(write_err(&dir))?;

        let file_name = format!("{}.{extension}", sample_stem());
        let path = dir.join(&file_name);
        let staging = dir.join(format!(".{file_name}.tmp"));

        tokio::fs::write(&staging, image).await.map_err(write_err(&staging))?;
        if let Err(source) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StoreError::Write { path, source });
        }

        tracing::info!(%identity, path = %path.display(), bytes = image.len(), "sample stored");
        Ok(path)
    }
}

/// Regular, non-hidden files of one identity directory, sorted by name.
async fn list_samples(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut samples = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_name().as_encoded_bytes().starts_with(b".") {
            continue;
        }
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => samples.push(path),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable sample");
            }
        }
    }
    samples.sort();
    Ok(samples)
}

/// Submission-ordered, collision-resistant file stem: UTC time plus a random suffix.
fn sample_stem() -> String {
    let now = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{now}-{}", &nonce[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png;

    #[tokio::test]
    async fn test_open_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("training");
        let store = SampleStore::open(&root).await.unwrap();
        assert!(store.root().is_dir());
        assert!(store.list_identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_added_sample_is_listed_under_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path()).await.unwrap();

        let path = store.add_sample(Identity::new(7), &png(&[90])).await.unwrap();
        assert_eq!(path.parent().unwrap(), dir.path().join("7"));
        assert_eq!(path.extension().unwrap(), "png");

        let listing = store.list_identities().await.unwrap();
        assert_eq!(
            listing,
            vec![IdentitySamples {
                identity: Identity::new(7),
                samples: vec![path],
            }]
        );
    }

    #[tokio::test]
    async fn test_samples_have_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path()).await.unwrap();
        let image = png(&[10]);

        let a = store.add_sample(Identity::new(1), &image).await.unwrap();
        let b = store.add_sample(Identity::new(1), &image).await.unwrap();
        assert_ne!(a, b);

        let listing = store.list_identities().await.unwrap();
        assert_eq!(listing[0].samples.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_non_image_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path()).await.unwrap();

        let err = store.add_sample(Identity::new(1), &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptySample));
        let err = store.add_sample(Identity::new(1), b"hello").await.unwrap_err();
        assert!(matches!(err, StoreError::UnrecognisedImage));
        assert!(err.is_input_error());
        assert!(!dir.path().join("1").exists());
    }

    #[tokio::test]
    async fn test_listing_skips_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["2", "10", "alice", "007", "-3"] {
            std::fs::create_dir(root.join(name)).unwrap();
            std::fs::write(root.join(name).join("a.png"), png(&[1])).unwrap();
        }
        std::fs::write(root.join("5"), b"stray file").unwrap();
        std::fs::write(root.join("2").join(".hidden.tmp"), b"partial").unwrap();
        std::fs::write(root.join("2").join("b.png"), png(&[2])).unwrap();

        let store = SampleStore::open(root).await.unwrap();
        let listing = store.list_identities().await.unwrap();

        let ids: Vec<u32> = listing.iter().map(|s| s.identity.get()).collect();
        assert_eq!(ids, vec![2, 10]);
        assert_eq!(
            listing[0].samples,
            vec![root.join("2").join("a.png"), root.join("2").join("b.png")]
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_listing_skips_odd_names_and_dangling_links() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join(OsStr::from_bytes(b"4\xff"))).unwrap();
        std::fs::create_dir(root.join("4")).unwrap();
        std::fs::write(root.join("4").join("a.png"), png(&[1])).unwrap();
        std::os::unix::fs::symlink(root.join("missing.png"), root.join("4").join("b.png")).unwrap();
        std::fs::write(root.join("4").join("c.png"), png(&[2])).unwrap();

        let store = SampleStore::open(root).await.unwrap();
        let listing = store.list_identities().await.unwrap();
        assert_eq!(
            listing,
            vec![IdentitySamples {
                identity: Identity::new(4),
                samples: vec![root.join("4").join("a.png"), root.join("4").join("c.png")],
            }]
        );
    }

    #[tokio::test]
    async fn test_unreadable_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path().join("training")).await.unwrap();
        std::fs::remove_dir(store.root()).unwrap();
        let err = store.list_identities().await.unwrap_err();
        assert!(matches!(err, StoreError::ReadRoot { .. }));
    }
}
