use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use mediaconv_core::models::{ClaimKind, ConversionMedia, MediaOutcome, Rendition};
use mediaconv_processing::{fetch_to_tempfile, ImagePipeline};
use mediaconv_storage::keys::rendition_key;
use mediaconv_storage::Storage;

use crate::chunk::ItemTransform;

/// Normalized full-size JPEG for thumbnailed media.
///
/// Fast-path media complete without re-encoding; their original is what gets
/// delivered.
pub struct ConversionTransform {
    storage: Arc<dyn Storage>,
    pipeline: Arc<ImagePipeline>,
}

impl ConversionTransform {
    pub fn new(storage: Arc<dyn Storage>, pipeline: Arc<ImagePipeline>) -> Self {
        Self { storage, pipeline }
    }
}

#[async_trait]
impl ItemTransform for ConversionTransform {
    fn kind(&self) -> ClaimKind {
        ClaimKind::Conversion
    }

    #[tracing::instrument(skip(self, media), fields(media_id = %media.id, fast_path = media.fast_path))]
    async fn transform(&self, media: &ConversionMedia) -> Result<MediaOutcome> {
        if media.fast_path {
            return Ok(MediaOutcome::Completed { renditions: vec![] });
        }

        let source = fetch_to_tempfile(self.storage.as_ref(), &media.original_key).await?;

        let pipeline = self.pipeline.clone();
        let path = source.path().to_path_buf();
        let jpeg = tokio::task::spawn_blocking(move || pipeline.normalize(&path))
            .await
            .context("Conversion task panicked")??;
        drop(source);

        let key = rendition_key(media.job_id, media.id, Rendition::Converted);
        self.storage
            .upload_with_key(&key, jpeg, "image/jpeg")
            .await
            .context("Failed to store converted image")?;

        Ok(MediaOutcome::Completed {
            renditions: vec![Rendition::Converted],
        })
    }
}
