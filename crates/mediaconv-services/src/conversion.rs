//! The operations exposed to callers: job lifecycle, status, download and
//! deletion.

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use mediaconv_core::models::{
    resolve_phase, ConversionJob, JobPhase, JobStatus, MediaCounts, MediaStatus, MediaSummary,
    ProgressPhase, ProgressSnapshot, Rendition,
};
use mediaconv_core::{AppError, PipelineConfig, ProgressTracker};
use mediaconv_db::JobStore;
use mediaconv_storage::keys::rendition_key;
use mediaconv_storage::Storage;
use mediaconv_worker::{JobEvent, JobEventBus, JobEventKind, Task, TaskDispatcher};

use crate::archive::{plan_entries, ArchiveBuilder, ArchiveStream};
use crate::ingestion::{IngestOptions, IngestionService, UploadedFile};

/// Result of `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: Uuid,
    pub name: String,
    pub phase: JobPhase,
    /// Stored lifecycle status, for diagnostics; `phase` is what to act on.
    pub status: JobStatus,
    pub totals: MediaCounts,
    pub processed_count: u64,
    pub deletion_in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    pub items: Vec<MediaSummary>,
    pub failed_items: Vec<MediaSummary>,
}

pub struct ArchiveDownload {
    pub filename: String,
    pub stream: ArchiveStream,
}

/// Progress entry worth showing for a phase.
fn progress_phase_for(phase: JobPhase) -> Option<ProgressPhase> {
    match phase {
        JobPhase::Uploading | JobPhase::Uploaded => Some(ProgressPhase::Thumbnails),
        JobPhase::Converting => Some(ProgressPhase::Conversion),
        JobPhase::Pending | JobPhase::Ready | JobPhase::Failed => None,
    }
}

#[derive(Clone)]
pub struct ConversionService {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    dispatcher: Arc<dyn TaskDispatcher>,
    progress: ProgressTracker,
    events: JobEventBus,
    config: Arc<PipelineConfig>,
    ingestion: IngestionService,
    archive: ArchiveBuilder,
}

impl ConversionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        dispatcher: Arc<dyn TaskDispatcher>,
        progress: ProgressTracker,
        events: JobEventBus,
        config: Arc<PipelineConfig>,
    ) -> Self {
        let ingestion =
            IngestionService::new(store.clone(), storage.clone(), dispatcher.clone(), &config);
        let archive = ArchiveBuilder::new(storage.clone(), progress.clone());
        Self {
            store,
            storage,
            dispatcher,
            progress,
            events,
            config,
            ingestion,
            archive,
        }
    }

    async fn load_job(&self, job_id: Uuid) -> Result<ConversionJob, AppError> {
        self.store
            .get_job(job_id)
            .await
            .context("Failed to load job")?
            .ok_or_else(|| AppError::NotFound(format!("Job not found: {}", job_id)))
    }

    fn ensure_not_deleting(job: &ConversionJob) -> Result<(), AppError> {
        if job.deletion_in_progress {
            return Err(AppError::Conflict(format!("Job {} is being deleted", job.id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_job(&self, name: Option<String>) -> Result<ConversionJob, AppError> {
        let job = ConversionJob::new(name);
        self.store
            .create_job(&job)
            .await
            .context("Failed to create job")?;
        tracing::info!(job_id = %job.id, name = %job.display_name(), "Job created");
        Ok(job)
    }

    pub async fn ingest(
        &self,
        job_id: Uuid,
        upload: UploadedFile,
        folder_hint: Option<&str>,
        options: IngestOptions,
    ) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .ingestion
            .ingest(job_id, upload, folder_hint, options)
            .await?)
    }

    /// Phase, totals and per-item lines, resolved from the media rows.
    ///
    /// Stale `converting` rows whose converted rendition already exists are
    /// repaired on the way.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusReport, AppError> {
        let job = self.load_job(job_id).await?;
        let mut media = self
            .store
            .list_media(job_id)
            .await
            .context("Failed to list media")?;

        let cutoff = self.config.stale_claim_cutoff();
        for item in media
            .iter_mut()
            .filter(|m| m.conversion_status == MediaStatus::Converting && m.claim_expired(cutoff))
        {
            let key = rendition_key(job_id, item.id, Rendition::Converted);
            let exists = match self.storage.exists(&key).await {
                Ok(exists) => exists,
                Err(e) => {
                    tracing::warn!(media_id = %item.id, error = %e, "Repair probe failed");
                    false
                }
            };
            if exists
                && self
                    .store
                    .repair_media(item.id, cutoff)
                    .await
                    .context("Failed to repair media")?
            {
                tracing::info!(media_id = %item.id, "Repaired stale converting media");
                item.conversion_status = MediaStatus::Completed;
                item.manifest.insert(Rendition::Converted);
                item.claim_token = None;
            }
        }

        let totals = MediaCounts::tally(&media);
        let phase = if job.status == JobStatus::Failed {
            JobPhase::Failed
        } else {
            resolve_phase(&totals)
        };

        let progress = match progress_phase_for(phase) {
            Some(p) => self.progress.read(job_id, p).await,
            None => None,
        };

        let items: Vec<MediaSummary> = media.iter().map(MediaSummary::from).collect();
        let failed_items = items
            .iter()
            .filter(|m| m.status == MediaStatus::Failed)
            .cloned()
            .collect();

        Ok(JobStatusReport {
            job_id,
            name: job.display_name(),
            phase,
            status: job.status,
            totals,
            processed_count: job.processed_count,
            deletion_in_progress: job.deletion_in_progress,
            progress,
            items,
            failed_items,
        })
    }

    /// Move the job to `converting` and enqueue its first conversion chunk.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn start_conversion(&self, job_id: Uuid) -> Result<(), AppError> {
        let job = self.load_job(job_id).await?;
        Self::ensure_not_deleting(&job)?;
        if job.status == JobStatus::Failed {
            return Err(AppError::InvalidInput(format!("Job {} has failed", job_id)));
        }
        if job.total_count == 0 {
            return Err(AppError::InvalidInput(format!("Job {} has no media", job_id)));
        }

        if job.status != JobStatus::Completed {
            self.store
                .reset_processed(job_id)
                .await
                .context("Failed to reset processed count")?;
            self.store
                .advance_job_status(job_id, JobStatus::Converting)
                .await
                .context("Failed to advance job status")?;
        }

        self.dispatcher
            .dispatch(Task::Conversion { job_id }, None)
            .await
            .context("Failed to dispatch conversion chunk")?;

        tracing::info!("Conversion started");
        Ok(())
    }

    /// Archive of the job's media as a byte stream.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn download(
        &self,
        job_id: Uuid,
        display_name: Option<String>,
    ) -> Result<ArchiveDownload, AppError> {
        let job = self.load_job(job_id).await?;
        Self::ensure_not_deleting(&job)?;

        let media = self
            .store
            .list_media(job_id)
            .await
            .context("Failed to list media")?;
        if media.is_empty() {
            return Err(AppError::InvalidInput(format!("Job {} has no media", job_id)));
        }

        let root = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| job.display_name());
        let entries = plan_entries(&root, &media);
        let filename = format!("{}.zip", mediaconv_core::sanitize::sanitize_filename(&root));

        let stream = if self.config.archive_streaming {
            self.archive.stream(job_id, entries)
        } else {
            self.archive.buffered(job_id, entries).await?
        };

        Ok(ArchiveDownload { filename, stream })
    }

    /// Set the deletion guard and hand teardown to the queue.
    ///
    /// Returns as soon as the task is queued. Deleting a job that is already
    /// being deleted is a no-op.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn delete_job(&self, job_id: Uuid) -> Result<(), AppError> {
        let job = self.load_job(job_id).await?;
        if job.deletion_in_progress {
            tracing::debug!("Deletion already in progress");
            return Ok(());
        }

        self.store
            .set_deletion_guard(job_id, true)
            .await
            .context("Failed to set deletion guard")?;

        if let Err(e) = self
            .dispatcher
            .dispatch(Task::Deletion { job_id }, None)
            .await
        {
            if let Err(clear) = self.store.set_deletion_guard(job_id, false).await {
                tracing::error!(error = %clear, "Failed to clear deletion guard");
            }
            return Err(e.context("Failed to dispatch deletion").into());
        }

        tracing::info!("Deletion queued");
        Ok(())
    }

    /// Subscribe before triggering work, then pass the receiver to
    /// [`wait_for`](Self::wait_for).
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub async fn wait_for(
        &self,
        receiver: broadcast::Receiver<JobEvent>,
        job_id: Uuid,
        kinds: &[JobEventKind],
        timeout: Duration,
    ) -> Option<JobEvent> {
        JobEventBus::wait_for(receiver, job_id, kinds, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_follows_phase() {
        assert_eq!(
            progress_phase_for(JobPhase::Uploading),
            Some(ProgressPhase::Thumbnails)
        );
        assert_eq!(
            progress_phase_for(JobPhase::Converting),
            Some(ProgressPhase::Conversion)
        );
        assert_eq!(progress_phase_for(JobPhase::Ready), None);
    }
}
