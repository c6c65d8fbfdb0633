//! Bulk teardown of a job.

use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

use mediaconv_core::models::Rendition;
use mediaconv_core::ProgressTracker;
use mediaconv_db::JobStore;
use mediaconv_storage::keys::{job_prefix, rendition_key};
use mediaconv_storage::Storage;

use crate::events::{JobEventBus, JobEventKind};
use crate::reclaim::{MemoryReclaimer, ReclaimSchedule};

pub struct DeletionWorker {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    progress: ProgressTracker,
    events: JobEventBus,
    reclaimer: Arc<dyn MemoryReclaimer>,
    reclaim_every: usize,
}

impl DeletionWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        progress: ProgressTracker,
        events: JobEventBus,
        reclaimer: Arc<dyn MemoryReclaimer>,
        reclaim_every: usize,
    ) -> Self {
        Self {
            store,
            storage,
            progress,
            events,
            reclaimer,
            reclaim_every,
        }
    }

    /// Delete every media item of a job, then the job row.
    ///
    /// Per-item failures are logged and skipped. The guard lives on the job
    /// row, so deleting the row releases it. Once the row is gone the job's
    /// key prefix is swept for blobs no listed row accounted for. Returns the
    /// number of media rows removed.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) -> Result<usize> {
        let media = self
            .store
            .list_media(job_id)
            .await
            .context("Failed to list media for deletion")?;

        let mut schedule = ReclaimSchedule::new(self.reclaimer.as_ref(), self.reclaim_every);
        let mut removed = 0usize;

        for item in &media {
            for rendition in Rendition::ALL {
                let key = rendition_key(job_id, item.id, rendition);
                if let Err(e) = self.storage.delete(&key).await {
                    tracing::warn!(media_id = %item.id, key = %key, error = %e, "Failed to delete rendition");
                }
            }
            if let Err(e) = self.storage.delete(&item.original_key).await {
                tracing::warn!(media_id = %item.id, error = %e, "Failed to delete original");
            }
            match self.store.delete_media(item.id).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(media_id = %item.id, error = %e, "Failed to delete media row")
                }
            }
            schedule.item_done();
        }

        let existed = self
            .store
            .delete_job(job_id)
            .await
            .context("Failed to delete job row")?;
        if let Err(e) = self.storage.delete_prefix(&job_prefix(job_id)).await {
            tracing::warn!(error = %e, "Failed to sweep job prefix");
        }
        self.progress.clear(job_id).await;

        if existed {
            self.events.publish(job_id, JobEventKind::Deleted);
            tracing::info!(removed, "Job deleted");
        } else {
            tracing::debug!("Job already gone");
        }

        Ok(removed)
    }

    /// Release the guard after deletion gave up, so a later retry can run.
    pub async fn abandon(&self, job_id: Uuid) {
        if let Err(e) = self.store.set_deletion_guard(job_id, false).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to clear deletion guard");
        }
        self.progress.clear(job_id).await;
        self.events.publish(job_id, JobEventKind::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclaim::TracingReclaimer;
    use mediaconv_core::models::{ConversionJob, NewMedia, ProgressPhase};
    use mediaconv_db::MemoryJobStore;
    use mediaconv_infra::MokaCache;
    use mediaconv_storage::keys::original_key;
    use mediaconv_storage::LocalStorage;
    use std::time::Duration;

    #[tokio::test]
    async fn removes_blobs_rows_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(dir.path(), "http://localhost".to_string())
                .await
                .unwrap(),
        );
        let store = Arc::new(MemoryJobStore::new());
        let progress = ProgressTracker::new(Arc::new(MokaCache::default()), Duration::from_secs(60));
        let events = JobEventBus::new();

        let job = ConversionJob::new(None);
        store.create_job(&job).await.unwrap();
        let rows = (0..3)
            .map(|i| NewMedia {
                job_id: job.id,
                folder_path: String::new(),
                original_filename: format!("{i}.jpg"),
                original_key: original_key(job.id, uuid::Uuid::new_v4(), "jpg"),
                size_bytes: 1,
                fast_path: false,
            })
            .collect();
        let media = store.register_media(job.id, rows).await.unwrap();
        for item in &media {
            storage
                .upload_with_key(&item.original_key, vec![1, 2, 3], "image/jpeg")
                .await
                .unwrap();
            storage
                .upload_with_key(
                    &rendition_key(job.id, item.id, Rendition::ThumbSmall),
                    vec![4],
                    "image/jpeg",
                )
                .await
                .unwrap();
        }
        progress.publish(job.id, ProgressPhase::Thumbnails, 1, 3).await;
        store.set_deletion_guard(job.id, true).await.unwrap();

        let receiver = events.subscribe();
        let worker = DeletionWorker::new(
            store.clone(),
            storage.clone(),
            progress.clone(),
            events,
            Arc::new(TracingReclaimer),
            2,
        );
        assert_eq!(worker.run(job.id).await.unwrap(), 3);

        assert!(store.get_job(job.id).await.unwrap().is_none());
        assert!(store.list_media(job.id).await.unwrap().is_empty());
        for item in &media {
            assert!(!storage.exists(&item.original_key).await.unwrap());
        }
        assert!(progress
            .read(job.id, ProgressPhase::Thumbnails)
            .await
            .is_none());
        let event = JobEventBus::wait_for(
            receiver,
            job.id,
            &[JobEventKind::Deleted],
            Duration::from_secs(1),
        )
        .await;
        assert!(event.is_some());

        // Replay is harmless.
        assert_eq!(worker.run(job.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweeps_blobs_without_a_listed_row() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(dir.path(), "http://localhost".to_string())
                .await
                .unwrap(),
        );
        let store = Arc::new(MemoryJobStore::new());
        let job = ConversionJob::new(None);
        store.create_job(&job).await.unwrap();

        let stray = rendition_key(job.id, uuid::Uuid::new_v4(), Rendition::Converted);
        storage
            .upload_with_key(&stray, vec![9], "image/jpeg")
            .await
            .unwrap();
        let other = ConversionJob::new(None);
        let kept = original_key(other.id, uuid::Uuid::new_v4(), "jpg");
        storage
            .upload_with_key(&kept, vec![1], "image/jpeg")
            .await
            .unwrap();

        let worker = DeletionWorker::new(
            store.clone(),
            storage.clone(),
            ProgressTracker::new(Arc::new(MokaCache::default()), Duration::from_secs(60)),
            JobEventBus::new(),
            Arc::new(TracingReclaimer),
            10,
        );
        assert_eq!(worker.run(job.id).await.unwrap(), 0);

        assert!(!storage.exists(&stray).await.unwrap());
        assert!(!dir.path().join(job_prefix(job.id)).exists());
        assert!(storage.exists(&kept).await.unwrap());
    }
}
