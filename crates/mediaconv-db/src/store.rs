//! Row-store contract shared by the workers and services.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaconv_core::models::{
    ClaimKind, ConversionJob, ConversionMedia, JobStatus, MediaCounts, MediaOutcome, NewMedia,
};
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &ConversionJob) -> Result<()>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ConversionJob>>;

    /// Delete the job row; its media rows go with it. Returns whether a row existed.
    async fn delete_job(&self, job_id: Uuid) -> Result<bool>;

    /// Move the job to `next` if the transition is allowed.
    ///
    /// Returns the stored status afterwards, or `None` when the job is gone.
    async fn advance_job_status(&self, job_id: Uuid, next: JobStatus) -> Result<Option<JobStatus>>;

    /// Set or clear the deletion guard. Returns whether the job exists.
    async fn set_deletion_guard(&self, job_id: Uuid, in_progress: bool) -> Result<bool>;

    /// Reset the per-phase processed counter.
    async fn reset_processed(&self, job_id: Uuid) -> Result<()>;

    /// Add to the processed counter, never past `total_count`.
    async fn increment_processed(&self, job_id: Uuid, by: u64) -> Result<()>;

    /// Insert media rows and grow the job's `total_count` in one step.
    async fn register_media(&self, job_id: Uuid, rows: Vec<NewMedia>) -> Result<Vec<ConversionMedia>>;

    /// All media of a job in insertion order.
    async fn list_media(&self, job_id: Uuid) -> Result<Vec<ConversionMedia>>;

    async fn media_counts(&self, job_id: Uuid) -> Result<MediaCounts>;

    /// Atomically claim up to `limit` rows matching `kind`, oldest first.
    ///
    /// Rows already claimed are skipped unless their claim predates
    /// `stale_before`. Claimed rows carry `token` until finished.
    async fn claim_media(
        &self,
        job_id: Uuid,
        kind: ClaimKind,
        limit: usize,
        token: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<ConversionMedia>>;

    /// Rows still pending for a phase, claimed or not.
    async fn count_outstanding(&self, job_id: Uuid, kind: ClaimKind) -> Result<u64>;

    /// Record the outcome of a claimed row and release the claim.
    ///
    /// Applies only while `token` still holds the claim; returns whether it did.
    async fn finish_media(&self, media_id: Uuid, token: Uuid, outcome: &MediaOutcome) -> Result<bool>;

    /// Mark a stale `converting` row completed with its normalized rendition.
    async fn repair_media(&self, media_id: Uuid, stale_before: DateTime<Utc>) -> Result<bool>;

    async fn delete_media(&self, media_id: Uuid) -> Result<()>;
}
