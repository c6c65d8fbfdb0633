//! The chunk state machine shared by the thumbnail and conversion workers.
//!
//! One invocation claims a bounded, insertion-ordered slice of matching rows,
//! processes it item by item and reports what should happen next. It never
//! dispatches anything itself; the driver in [`crate::context`] does.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use mediaconv_core::models::{ClaimKind, ConversionMedia, JobStatus, MediaOutcome, ProgressPhase};
use mediaconv_core::{PipelineConfig, ProgressTracker};
use mediaconv_db::JobStore;
use mediaconv_storage::keys::rendition_key;
use mediaconv_storage::Storage;

use crate::events::{JobEventBus, JobEventKind};
use crate::reclaim::{MemoryReclaimer, ReclaimSchedule};

/// Per-item work of a chunked worker.
#[async_trait]
pub trait ItemTransform: Send + Sync {
    fn kind(&self) -> ClaimKind;

    /// Produce the outcome of one claimed row. An error marks the item failed.
    async fn transform(&self, media: &ConversionMedia) -> Result<MediaOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStep {
    /// Matching work remains; run again after `delay`.
    Rearm { delay: Duration },
    /// This invocation processed the last items and moved the job on.
    Advanced { status: JobStatus },
    /// Nothing matched and nothing remains.
    Drained,
    /// Deletion guard set, job failed or gone; nothing was touched.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub processed: usize,
    pub remaining: u64,
    pub next: ChunkStep,
}

impl ChunkOutcome {
    fn cancelled() -> Self {
        Self {
            processed: 0,
            remaining: 0,
            next: ChunkStep::Cancelled,
        }
    }
}

/// Where a drained phase leaves the job.
fn phase_exit(kind: ClaimKind) -> (ProgressPhase, JobStatus, JobEventKind) {
    match kind {
        ClaimKind::Thumbnail => (
            ProgressPhase::Thumbnails,
            JobStatus::Uploaded,
            JobEventKind::ThumbnailsDone,
        ),
        ClaimKind::Conversion => (
            ProgressPhase::Conversion,
            JobStatus::Completed,
            JobEventKind::ConversionDone,
        ),
    }
}

#[derive(Clone)]
pub struct ChunkRunner {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    progress: ProgressTracker,
    events: JobEventBus,
    reclaimer: Arc<dyn MemoryReclaimer>,
    config: Arc<PipelineConfig>,
}

impl ChunkRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        progress: ProgressTracker,
        events: JobEventBus,
        reclaimer: Arc<dyn MemoryReclaimer>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            storage,
            progress,
            events,
            reclaimer,
            config,
        }
    }

    /// Run one chunk of `transform`'s phase for a job.
    ///
    /// Errors are chunk-level (the row store failed); per-item failures are
    /// recorded on the item and never surface here.
    #[tracing::instrument(skip(self, transform), fields(job_id = %job_id, phase = %transform.kind()))]
    pub async fn run(&self, job_id: Uuid, transform: &dyn ItemTransform) -> Result<ChunkOutcome> {
        let kind = transform.kind();
        let (phase, exit_status, exit_event) = phase_exit(kind);

        let Some(job) = self
            .store
            .get_job(job_id)
            .await
            .context("Failed to load job")?
        else {
            tracing::debug!("Job no longer exists, skipping chunk");
            return Ok(ChunkOutcome::cancelled());
        };
        if job.deletion_in_progress {
            tracing::info!("Deletion in progress, skipping chunk");
            return Ok(ChunkOutcome::cancelled());
        }
        if job.status == JobStatus::Failed {
            tracing::info!("Job failed, skipping chunk");
            return Ok(ChunkOutcome::cancelled());
        }

        let token = Uuid::new_v4();
        let claimed = self
            .store
            .claim_media(
                job_id,
                kind,
                self.config.chunk_size,
                token,
                self.config.stale_claim_cutoff(),
            )
            .await
            .context("Failed to claim media")?;

        tracing::debug!(claimed = claimed.len(), token = %token, "Chunk claimed media");

        let mut schedule = ReclaimSchedule::new(self.reclaimer.as_ref(), self.config.reclaim_every);
        let mut processed = 0usize;

        for media in &claimed {
            let outcome = match transform.transform(media).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(media_id = %media.id, error = %format!("{:#}", e), "Media item failed");
                    MediaOutcome::Failed {
                        error: format!("{:#}", e),
                    }
                }
            };

            let applied = self
                .store
                .finish_media(media.id, token, &outcome)
                .await
                .context("Failed to record media outcome")?;

            if applied {
                self.store
                    .increment_processed(job_id, 1)
                    .await
                    .context("Failed to advance processed count")?;
                processed += 1;
                self.publish_progress(job_id, kind, phase).await?;
            } else {
                tracing::warn!(media_id = %media.id, "Claim lost before finishing item");
                self.discard_if_torn_down(media, &outcome).await?;
            }

            schedule.item_done();
        }

        let remaining = self
            .store
            .count_outstanding(job_id, kind)
            .await
            .context("Failed to count remaining media")?;

        if remaining > 0 {
            tracing::debug!(processed, remaining, "Chunk done, re-arming");
            return Ok(ChunkOutcome {
                processed,
                remaining,
                next: ChunkStep::Rearm {
                    delay: self.config.rechunk_delay,
                },
            });
        }

        let Some(status) = self
            .store
            .advance_job_status(job_id, exit_status)
            .await
            .context("Failed to advance job status")?
        else {
            return Ok(ChunkOutcome::cancelled());
        };

        if processed > 0 || status != job.status {
            self.events.publish(job_id, exit_event);
        }

        let next = if processed > 0 {
            tracing::info!(processed, status = %status, "Phase drained");
            ChunkStep::Advanced { status }
        } else {
            ChunkStep::Drained
        };

        Ok(ChunkOutcome {
            processed,
            remaining,
            next,
        })
    }

    /// Remove renditions written for a row whose job was deleted while the
    /// item was in flight. A claim lost to a stale reclaim keeps its blobs,
    /// the new holder writes the same keys.
    async fn discard_if_torn_down(
        &self,
        media: &ConversionMedia,
        outcome: &MediaOutcome,
    ) -> Result<()> {
        let renditions = match outcome {
            MediaOutcome::Thumbnailed { renditions } | MediaOutcome::Completed { renditions } => {
                renditions
            }
            MediaOutcome::Failed { .. } => return Ok(()),
        };
        let torn_down = self
            .store
            .get_job(media.job_id)
            .await
            .context("Failed to reload job")?
            .map_or(true, |job| job.deletion_in_progress);
        if !torn_down {
            return Ok(());
        }

        for rendition in renditions {
            let key = rendition_key(media.job_id, media.id, *rendition);
            if let Err(e) = self.storage.delete(&key).await {
                tracing::warn!(
                    media_id = %media.id,
                    key = %key,
                    error = %e,
                    "Failed to discard rendition"
                );
            }
        }
        tracing::debug!(media_id = %media.id, "Discarded renditions of deleted job");
        Ok(())
    }

    /// Progress of one phase: rows no longer outstanding for it over the
    /// job total. Independent of the shared `processed_count`, which the
    /// other phase may be advancing at the same time.
    async fn publish_progress(
        &self,
        job_id: Uuid,
        kind: ClaimKind,
        phase: ProgressPhase,
    ) -> Result<()> {
        let Some(job) = self
            .store
            .get_job(job_id)
            .await
            .context("Failed to reload job")?
        else {
            return Ok(());
        };
        let outstanding = self
            .store
            .count_outstanding(job_id, kind)
            .await
            .context("Failed to count remaining media")?;
        self.progress
            .publish(
                job_id,
                phase,
                job.total_count.saturating_sub(outstanding),
                job.total_count,
            )
            .await;
        Ok(())
    }
}
