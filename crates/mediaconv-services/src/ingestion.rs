//! Upload ingestion: single images and container archives.
//!
//! Everything is validated before any blob or row is written. A rejected
//! upload leaves the job exactly as it was.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use mediaconv_core::models::{JobStatus, NewMedia};
use mediaconv_core::sanitize::{join_folder_paths, sanitize_filename, split_extension};
use mediaconv_core::{AppError, PipelineConfig, ValidationError};
use mediaconv_db::JobStore;
use mediaconv_processing::validator::is_container;
use mediaconv_processing::{ContainerExtractor, ContainerLimits, ExtractError, UploadValidator};
use mediaconv_storage::keys::original_key;
use mediaconv_storage::Storage;
use mediaconv_worker::{Task, TaskDispatcher};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} is being deleted")]
    BeingDeleted(Uuid),

    #[error("Job {0} is already {1}")]
    JobFinished(Uuid, JobStatus),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(v) => AppError::Validation(v),
            IngestError::JobNotFound(id) => AppError::NotFound(format!("Job not found: {}", id)),
            IngestError::BeingDeleted(id) => {
                AppError::Conflict(format!("Job {} is being deleted", id))
            }
            IngestError::JobFinished(id, status) => {
                AppError::InvalidInput(format!("Job {} is already {}", id, status))
            }
            IngestError::Other(e) => AppError::from(e),
        }
    }
}

impl From<ExtractError> for IngestError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Validation(v) => IngestError::Validation(v),
            ExtractError::Io(e) => IngestError::Other(anyhow::Error::new(e).context("Failed to extract container")),
        }
    }
}

/// Per-call ingestion switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Thumbnail the media but deliver the originals without re-encoding.
    pub skip_conversion: bool,
}

/// An upload already spooled to local disk.
pub struct UploadedFile {
    pub filename: String,
    pub file: NamedTempFile,
    pub size: u64,
}

impl UploadedFile {
    pub fn from_temp(filename: impl Into<String>, file: NamedTempFile) -> std::io::Result<Self> {
        let size = file.as_file().metadata()?.len();
        Ok(Self {
            filename: filename.into(),
            file,
            size,
        })
    }
}

/// An image ready to be stored: local bytes plus where it goes.
struct StagedImage {
    path: PathBuf,
    folder: String,
    filename: String,
    extension: String,
    size: u64,
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

async fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(4);
    tokio::fs::File::open(path)
        .await?
        .take(4)
        .read_to_end(&mut head)
        .await?;
    Ok(head)
}

#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    dispatcher: Arc<dyn TaskDispatcher>,
    validator: Arc<UploadValidator>,
    limits: ContainerLimits,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            storage,
            dispatcher,
            validator: Arc::new(UploadValidator::from_config(config)),
            limits: ContainerLimits::from(config),
        }
    }

    /// Store an upload as media of `job_id` and kick off thumbnailing.
    ///
    /// Container uploads get the container's base name as a folder prefix
    /// below `folder_hint`; their internal folders are kept.
    #[tracing::instrument(skip(self, upload), fields(job_id = %job_id, filename = %upload.filename, size = upload.size))]
    pub async fn ingest(
        &self,
        job_id: Uuid,
        upload: UploadedFile,
        folder_hint: Option<&str>,
        options: IngestOptions,
    ) -> Result<Vec<Uuid>, IngestError> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .context("Failed to load job")?
            .ok_or(IngestError::JobNotFound(job_id))?;
        if job.deletion_in_progress {
            return Err(IngestError::BeingDeleted(job_id));
        }
        if job.status.is_terminal() {
            return Err(IngestError::JobFinished(job_id, job.status));
        }

        if upload.size == 0 {
            return Err(ValidationError::EmptyUpload.into());
        }
        self.validator.validate_size(upload.size)?;

        let hint = folder_hint.unwrap_or_default();
        let head = read_head(upload.file.path())
            .await
            .context("Failed to read upload")?;

        // Keeps extracted entries on disk until they are stored.
        let _workdir;
        let staged = if is_container(&upload.filename, &head) {
            let dir = tempfile::tempdir().context("Failed to create extraction dir")?;
            let extractor = ContainerExtractor::new((*self.validator).clone(), self.limits);
            let source = upload.file.path().to_path_buf();
            let dest = dir.path().to_path_buf();
            let entries = tokio::task::spawn_blocking(move || extractor.extract(&source, &dest))
                .await
                .context("Extraction task panicked")??;

            let container_name = sanitize_filename(&upload.filename);
            let (stem, _) = split_extension(&container_name);
            let staged = entries
                .into_iter()
                .map(|entry| StagedImage {
                    folder: join_folder_paths([hint, stem, entry.folder.as_str()]),
                    path: entry.path,
                    filename: entry.filename,
                    extension: entry.extension,
                    size: entry.size,
                })
                .collect::<Vec<_>>();
            _workdir = Some(dir);
            staged
        } else {
            let extension = self.validator.validate_image_name(&upload.filename)?;
            _workdir = None;
            vec![StagedImage {
                path: upload.file.path().to_path_buf(),
                folder: join_folder_paths([hint]),
                filename: sanitize_filename(&upload.filename),
                extension,
                size: upload.size,
            }]
        };

        tracing::debug!(items = staged.len(), "Upload validated");

        let rows = self.store_blobs(job_id, &staged, options).await?;
        let media = match self.store.register_media(job_id, rows.clone()).await {
            Ok(media) => media,
            Err(e) => {
                self.discard_blobs(rows.iter().map(|r| r.original_key.as_str())).await;
                return Err(IngestError::Other(e.context("Failed to register media")));
            }
        };

        self.store
            .advance_job_status(job_id, JobStatus::Uploading)
            .await
            .context("Failed to advance job status")?;

        self.dispatcher
            .dispatch(Task::Thumbnails { job_id }, None)
            .await
            .context("Failed to dispatch thumbnail chunk")?;

        tracing::info!(items = media.len(), fast_path = options.skip_conversion, "Upload ingested");
        Ok(media.into_iter().map(|m| m.id).collect())
    }

    /// Upload every staged image; on failure, remove what was stored.
    async fn store_blobs(
        &self,
        job_id: Uuid,
        staged: &[StagedImage],
        options: IngestOptions,
    ) -> Result<Vec<NewMedia>, IngestError> {
        let mut rows = Vec::with_capacity(staged.len());
        for image in staged {
            let key = original_key(job_id, Uuid::new_v4(), &image.extension);
            if let Err(e) = self
                .storage
                .upload_file(&key, &image.path, content_type_for(&image.extension))
                .await
            {
                self.discard_blobs(rows.iter().map(|r: &NewMedia| r.original_key.as_str()))
                    .await;
                return Err(IngestError::Other(
                    anyhow::Error::new(e).context("Failed to store original"),
                ));
            }
            rows.push(NewMedia {
                job_id,
                folder_path: image.folder.clone(),
                original_filename: image.filename.clone(),
                original_key: key,
                size_bytes: image.size,
                fast_path: options.skip_conversion,
            });
        }
        Ok(rows)
    }

    async fn discard_blobs<'a>(&self, keys: impl Iterator<Item = &'a str>) {
        for key in keys {
            if let Err(e) = self.storage.delete(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to discard blob");
            }
        }
    }
}
