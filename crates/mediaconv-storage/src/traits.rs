//! Storage abstraction trait

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<StorageError> for mediaconv_core::AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => {
                mediaconv_core::AppError::NotFound(format!("Blob not found: {}", key))
            }
            other => mediaconv_core::AppError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked read of a stored blob.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Blob store keyed by opaque paths (see [`crate::keys`]).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store bytes under `storage_key`, returning the public URL.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Stream a local file into the store without buffering it.
    async fn upload_file(
        &self,
        storage_key: &str,
        source: &Path,
        content_type: &str,
    ) -> StorageResult<String>;

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Open a chunked read. Fails with `NotFound` before yielding anything
    /// when the blob is missing.
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Delete a blob. Deleting a missing blob succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Delete every blob whose key starts with `prefix/`. A missing prefix
    /// succeeds.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()>;
}
