//! Blob storage abstraction for extracted reference text.
//!
//! The loader only needs `get` and `exists` over UTF-8 text blobs; the
//! production deployment backs this with object storage, local runs and
//! tests use the filesystem implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(String),
}

/// Object storage client abstraction.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Retrieve file content as UTF-8 text.
    async fn get(&self, path: &str) -> Result<String, StorageError>;

    /// Check whether a path exists.
    async fn exists(&self, path: &str) -> bool;
}

/// Filesystem-backed storage client rooted at a configured directory.
pub struct FsStorageClient {
    root: PathBuf,
}

impl FsStorageClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

#[async_trait]
impl StorageClient for FsStorageClient {
    async fn get(&self, path: &str) -> Result<String, StorageError> {
        let full_path = self.resolve(path);
        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.resolve(path)).await.unwrap_or(false)
    }
}
