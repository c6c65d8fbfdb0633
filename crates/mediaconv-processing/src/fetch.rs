use anyhow::{Context, Result};
use futures::StreamExt;
use mediaconv_storage::Storage;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

/// Spool a blob to a temp file chunk by chunk.
///
/// The file is removed when the returned handle drops. A missing blob comes
/// back as the underlying `StorageError::NotFound`.
pub async fn fetch_to_tempfile(storage: &dyn Storage, key: &str) -> Result<NamedTempFile> {
    let mut stream = storage.download_stream(key).await?;

    let temp = NamedTempFile::new().context("Failed to create temp file")?;
    let mut file = tokio::fs::File::create(temp.path())
        .await
        .context("Failed to open temp file")?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .context("Failed to spool blob to temp file")?;
    }
    file.flush().await.context("Failed to flush temp file")?;

    tracing::debug!(key = %key, size_bytes = written, "Fetched blob to temp file");
    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaconv_storage::{LocalStorage, StorageError};

    #[tokio::test]
    async fn spools_blob_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://x".to_string())
            .await
            .unwrap();
        storage
            .upload_with_key("a/b.bin", vec![7u8; 100_000], "application/octet-stream")
            .await
            .unwrap();

        let temp = fetch_to_tempfile(&storage, "a/b.bin").await.unwrap();
        assert_eq!(std::fs::read(temp.path()).unwrap().len(), 100_000);

        let err = fetch_to_tempfile(&storage, "a/missing.bin").await.unwrap_err();
        assert!(err
            .downcast_ref::<StorageError>()
            .map(StorageError::is_not_found)
            .unwrap_or(false));
    }
}
