use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use mediaconv_core::models::{ClaimKind, ConversionMedia, MediaOutcome};
use mediaconv_processing::{fetch_to_tempfile, ImagePipeline};
use mediaconv_storage::keys::rendition_key;
use mediaconv_storage::Storage;

use crate::chunk::ItemTransform;

/// Small and large thumbnails for media that have none yet.
pub struct ThumbnailTransform {
    storage: Arc<dyn Storage>,
    pipeline: Arc<ImagePipeline>,
}

impl ThumbnailTransform {
    pub fn new(storage: Arc<dyn Storage>, pipeline: Arc<ImagePipeline>) -> Self {
        Self { storage, pipeline }
    }
}

#[async_trait]
impl ItemTransform for ThumbnailTransform {
    fn kind(&self) -> ClaimKind {
        ClaimKind::Thumbnail
    }

    #[tracing::instrument(skip(self, media), fields(media_id = %media.id))]
    async fn transform(&self, media: &ConversionMedia) -> Result<MediaOutcome> {
        let source = fetch_to_tempfile(self.storage.as_ref(), &media.original_key).await?;

        let pipeline = self.pipeline.clone();
        let path = source.path().to_path_buf();
        let renditions = tokio::task::spawn_blocking(move || pipeline.thumbnails(&path))
            .await
            .context("Thumbnail task panicked")??;
        drop(source);

        let mut stored = Vec::with_capacity(renditions.len());
        for (rendition, bytes) in renditions {
            let key = rendition_key(media.job_id, media.id, rendition);
            self.storage
                .upload_with_key(&key, bytes, "image/jpeg")
                .await
                .with_context(|| format!("Failed to store {}", rendition))?;
            stored.push(rendition);
        }

        Ok(MediaOutcome::Thumbnailed { renditions: stored })
    }
}
