use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaconv_core::models::{
    ClaimKind, ConversionJob, ConversionMedia, JobStatus, MediaCounts, MediaOutcome, MediaStatus,
    NewMedia, Rendition, RenditionManifest,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::JobStore;

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, ConversionJob>,
    /// Insertion order doubles as claim order.
    media: Vec<ConversionMedia>,
    next_seq: i64,
}

/// Row store held in process memory.
///
/// Every operation runs under one lock, which is what makes claims atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_outcome(media: &mut ConversionMedia, outcome: &MediaOutcome, now: DateTime<Utc>) {
    match outcome {
        MediaOutcome::Thumbnailed { renditions } => {
            media.manifest.extend(renditions.iter().copied());
        }
        MediaOutcome::Completed { renditions } => {
            media.manifest.extend(renditions.iter().copied());
            media.conversion_status = MediaStatus::Completed;
            media.conversion_completed_at = Some(now);
            media.error_message = None;
        }
        MediaOutcome::Failed { error } => {
            media.conversion_status = MediaStatus::Failed;
            media.conversion_completed_at = Some(now);
            media.error_message = Some(error.clone());
        }
    }
    media.claim_token = None;
    media.claimed_at = None;
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &ConversionJob) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(anyhow::anyhow!("Job {} already exists", job.id));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ConversionJob>> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.media.retain(|m| m.job_id != job_id);
        Ok(state.jobs.remove(&job_id).is_some())
    }

    async fn advance_job_status(&self, job_id: Uuid, next: JobStatus) -> Result<Option<JobStatus>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status != next && job.status.can_transition_to(next) {
            job.status = next;
            job.updated_at = Utc::now();
        }
        Ok(Some(job.status))
    }

    async fn set_deletion_guard(&self, job_id: Uuid, in_progress: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) => {
                job.deletion_in_progress = in_progress;
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_processed(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.processed_count = 0;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_processed(&self, job_id: Uuid, by: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.processed_count = job.processed_count.saturating_add(by).min(job.total_count);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn register_media(&self, job_id: Uuid, rows: Vec<NewMedia>) -> Result<Vec<ConversionMedia>> {
        let mut state = self.state.lock().await;
        let State {
            jobs,
            media,
            next_seq,
        } = &mut *state;

        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("Job {} not found", job_id))?;

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            *next_seq += 1;
            inserted.push(ConversionMedia {
                id: Uuid::new_v4(),
                job_id,
                seq: *next_seq,
                folder_path: row.folder_path,
                original_filename: row.original_filename,
                original_key: row.original_key,
                size_bytes: row.size_bytes,
                conversion_status: MediaStatus::Pending,
                fast_path: row.fast_path,
                manifest: RenditionManifest::default(),
                claim_token: None,
                claimed_at: None,
                error_message: None,
                upload_completed_at: Some(now),
                conversion_started_at: None,
                conversion_completed_at: None,
                created_at: now,
            });
        }

        job.total_count += inserted.len() as u64;
        job.updated_at = now;
        media.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn list_media(&self, job_id: Uuid) -> Result<Vec<ConversionMedia>> {
        let state = self.state.lock().await;
        Ok(state
            .media
            .iter()
            .filter(|m| m.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn media_counts(&self, job_id: Uuid) -> Result<MediaCounts> {
        let state = self.state.lock().await;
        Ok(MediaCounts::tally(
            state.media.iter().filter(|m| m.job_id == job_id),
        ))
    }

    async fn claim_media(
        &self,
        job_id: Uuid,
        kind: ClaimKind,
        limit: usize,
        token: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<ConversionMedia>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut claimed = Vec::new();

        for media in state.media.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            if media.job_id != job_id || !media.matches(kind) || !media.claim_expired(stale_before) {
                continue;
            }
            media.claim_token = Some(token);
            media.claimed_at = Some(now);
            if kind == ClaimKind::Conversion {
                media.conversion_status = MediaStatus::Converting;
                media.conversion_started_at = Some(now);
            }
            claimed.push(media.clone());
        }

        Ok(claimed)
    }

    async fn count_outstanding(&self, job_id: Uuid, kind: ClaimKind) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .media
            .iter()
            .filter(|m| m.job_id == job_id && m.is_outstanding(kind))
            .count() as u64)
    }

    async fn finish_media(&self, media_id: Uuid, token: Uuid, outcome: &MediaOutcome) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(media) = state
            .media
            .iter_mut()
            .find(|m| m.id == media_id && m.claim_token == Some(token))
        else {
            return Ok(false);
        };
        apply_outcome(media, outcome, Utc::now());
        Ok(true)
    }

    async fn repair_media(&self, media_id: Uuid, stale_before: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(media) = state.media.iter_mut().find(|m| {
            m.id == media_id
                && m.conversion_status == MediaStatus::Converting
                && m.claim_expired(stale_before)
        }) else {
            return Ok(false);
        };
        let outcome = MediaOutcome::Completed {
            renditions: vec![Rendition::Converted],
        };
        apply_outcome(media, &outcome, Utc::now());
        Ok(true)
    }

    async fn delete_media(&self, media_id: Uuid) -> Result<()> {
        self.state.lock().await.media.retain(|m| m.id != media_id);
        Ok(())
    }
}
