use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create the storage root if needed.
    ///
    /// * `base_path` - Root directory for blobs (e.g., "/var/lib/mediaconv")
    /// * `base_url` - Base URL for serving blobs (e.g., "http://localhost:3000/media")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    /// Map a key to a path under the root, refusing anything that could
    /// resolve outside of it.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty()
            || storage_key.contains("..")
            || storage_key.starts_with('/')
            || storage_key.contains('\\')
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key contains invalid characters: {}",
                storage_key
            )));
        }

        let relative = Path::new(storage_key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key resolves outside storage directory: {}",
                storage_key
            )));
        }

        Ok(self.base_path.join(relative))
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Remove now-empty directories between `path` and the storage root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<String> {
        let path = self.key_to_path(storage_key)?;
        let size = data.len();
        let start = Instant::now();

        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(self.generate_url(storage_key))
    }

    async fn upload_file(
        &self,
        storage_key: &str,
        source: &Path,
        _content_type: &str,
    ) -> StorageResult<String> {
        let path = self.key_to_path(storage_key)?;
        let start = Instant::now();

        self.ensure_parent_dir(&path).await?;

        let mut reader = fs::File::open(source).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to open source {}: {}", source.display(), e))
        })?;
        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let bytes_copied = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            key = %storage_key,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage file upload successful"
        );

        Ok(self.generate_url(storage_key))
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(storage_key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }

        fs::read(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to read file {}: {}", path.display(), e))
        })
    }

    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(storage_key)?;

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(storage_key.to_string()));
            }
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let key = storage_key.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |result| {
            result.map_err(|e| {
                tracing::error!(key = %key, error = %e, "Local storage stream read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                tracing::debug!(key = %storage_key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        let path = self.key_to_path(prefix.trim_end_matches('/'))?;

        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                tracing::debug!(prefix = %prefix, "Local storage prefix delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete directory {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::tempdir;

    async fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, "http://localhost:3000/media".to_string())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let url = storage
            .upload_with_key("jobs/a/originals/b.jpg", b"test data".to_vec(), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:3000/media/jobs/a/originals/b.jpg");
        assert_eq!(
            storage.download("jobs/a/originals/b.jpg").await.unwrap(),
            b"test data"
        );
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage.download("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("a\\..\\b").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn delete_missing_is_ok_and_prunes_directories() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        assert!(storage.delete("nonexistent/file.txt").await.is_ok());

        storage
            .upload_with_key("jobs/x/renditions/m/thumb_small.jpg", b"t".to_vec(), "image/jpeg")
            .await
            .unwrap();
        storage
            .delete("jobs/x/renditions/m/thumb_small.jpg")
            .await
            .unwrap();
        assert!(!dir.path().join("jobs").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn upload_file_streams_from_disk() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let src = dir.path().join("source.bin");
        tokio::fs::write(&src, b"from disk").await.unwrap();

        storage
            .upload_file("jobs/a/originals/c.png", &src, "image/png")
            .await
            .unwrap();
        assert_eq!(
            storage.download("jobs/a/originals/c.png").await.unwrap(),
            b"from disk"
        );
    }

    #[tokio::test]
    async fn delete_prefix_removes_the_whole_tree() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        for key in [
            "jobs/a/originals/1.jpg",
            "jobs/a/renditions/1/thumb_small.jpg",
            "jobs/b/originals/2.jpg",
        ] {
            storage
                .upload_with_key(key, b"x".to_vec(), "image/jpeg")
                .await
                .unwrap();
        }

        storage.delete_prefix("jobs/a").await.unwrap();
        assert!(!storage.exists("jobs/a/originals/1.jpg").await.unwrap());
        assert!(!storage
            .exists("jobs/a/renditions/1/thumb_small.jpg")
            .await
            .unwrap());
        assert!(!dir.path().join("jobs/a").exists());
        assert!(storage.exists("jobs/b/originals/2.jpg").await.unwrap());

        assert!(storage.delete_prefix("jobs/a").await.is_ok());
        assert!(matches!(
            storage.delete_prefix("../jobs").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn stream_download_and_missing_blob() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage
            .upload_with_key("s/dl.txt", b"stream download test".to_vec(), "text/plain")
            .await
            .unwrap();

        let mut stream = storage.download_stream("s/dl.txt").await.unwrap();
        let mut downloaded = Vec::new();
        while let Some(chunk) = stream.next().await {
            downloaded.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(downloaded, b"stream download test");

        let missing = storage.download_stream("s/none.txt").await;
        assert!(matches!(missing, Err(e) if e.is_not_found()));
    }
}
