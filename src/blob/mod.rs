//! Blob storage for uploaded document bytes
//!
//! Paths are content addressed (see [`crate::digest::storage_path`]); the
//! store itself only maps a relative path to bytes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Object storage used by the upload gate and the OCR stage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path`, replacing anything already there
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Fetch the bytes at `path`; `Error::NotFound` if absent
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Remove `path`. Missing blobs are not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Filesystem-backed blob store rooted at a directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(Error::Storage(format!("Invalid blob path: {}", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        debug!(path = %path, content_type = %content_type, size = bytes.len(), "blob put");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "blob directory creation failed");
                Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        // Write to a sibling temp file and rename so readers never see a partial blob
        let temp_path = full_path.with_extension("partial");
        let write = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &full_path).await?;
            Ok::<(), std::io::Error>(())
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!("Failed to write {}: {}", path, e)));
        }

        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob {}", path)))
            }
            Err(e) => Err(Error::Storage(format!("Failed to read {}: {}", path, e))),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Storage(format!("Failed to delete {}: {}", path, e))),
        }

        // Drop the digest directory once it is empty
        if let Some(parent) = full_path.parent() {
            if parent != self.root {
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());

        store
            .put("documents/abc/scan.pdf", b"%PDF-1.4", "application/pdf")
            .await
            .unwrap();
        assert!(store.exists("documents/abc/scan.pdf").await.unwrap());
        assert_eq!(
            store.get("documents/abc/scan.pdf").await.unwrap(),
            b"%PDF-1.4".to_vec()
        );

        store.delete("documents/abc/scan.pdf").await.unwrap();
        assert!(!store.exists("documents/abc/scan.pdf").await.unwrap());
        assert!(!tmp.path().join("documents/abc").exists());

        // Deleting again is fine
        store.delete("documents/abc/scan.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());

        let err = store.get("documents/nope/file.png").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().join("root"));

        let err = store.put("../outside.txt", b"x", "text/plain").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        let err = store.get("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
