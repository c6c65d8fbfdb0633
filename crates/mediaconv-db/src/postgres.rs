use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaconv_core::models::{
    ClaimKind, ConversionJob, ConversionMedia, JobStatus, MediaCounts, MediaOutcome, NewMedia,
    Rendition, RenditionManifest,
};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::store::JobStore;

const JOB_COLUMNS: &str = "id, name, status, total_count, processed_count, deletion_in_progress, created_at, updated_at";

const MEDIA_COLUMNS: &str = "id, job_id, seq, folder_path, original_filename, original_key, size_bytes, \
     conversion_status, fast_path, renditions, claim_token, claimed_at, error_message, \
     upload_completed_at, conversion_started_at, conversion_completed_at, created_at";

const THUMBNAILS_PRESENT: &str = "renditions @> ARRAY['thumb_small', 'thumb_large']::text[]";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    name: Option<String>,
    status: String,
    total_count: i64,
    processed_count: i64,
    deletion_in_progress: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for ConversionJob {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(ConversionJob {
            id: row.id,
            name: row.name,
            status: row.status.parse()?,
            total_count: row.total_count.max(0) as u64,
            processed_count: row.processed_count.max(0) as u64,
            deletion_in_progress: row.deletion_in_progress,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MediaRow {
    id: Uuid,
    job_id: Uuid,
    seq: i64,
    folder_path: String,
    original_filename: String,
    original_key: String,
    size_bytes: i64,
    conversion_status: String,
    fast_path: bool,
    renditions: Vec<String>,
    claim_token: Option<Uuid>,
    claimed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    upload_completed_at: Option<DateTime<Utc>>,
    conversion_started_at: Option<DateTime<Utc>>,
    conversion_completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MediaRow> for ConversionMedia {
    type Error = anyhow::Error;

    fn try_from(row: MediaRow) -> Result<Self> {
        Ok(ConversionMedia {
            id: row.id,
            job_id: row.job_id,
            seq: row.seq,
            folder_path: row.folder_path,
            original_filename: row.original_filename,
            original_key: row.original_key,
            size_bytes: row.size_bytes.max(0) as u64,
            conversion_status: row.conversion_status.parse()?,
            fast_path: row.fast_path,
            manifest: RenditionManifest::from_names(&row.renditions),
            claim_token: row.claim_token,
            claimed_at: row.claimed_at,
            error_message: row.error_message,
            upload_completed_at: row.upload_completed_at,
            conversion_started_at: row.conversion_started_at,
            conversion_completed_at: row.conversion_completed_at,
            created_at: row.created_at,
        })
    }
}

fn into_media(rows: Vec<MediaRow>) -> Result<Vec<ConversionMedia>> {
    let mut media = rows
        .into_iter()
        .map(ConversionMedia::try_from)
        .collect::<Result<Vec<_>>>()?;
    media.sort_by_key(|m| m.seq);
    Ok(media)
}

fn rendition_names(renditions: &[Rendition]) -> Vec<String> {
    renditions.iter().map(|r| r.as_str().to_string()).collect()
}

/// Postgres-backed row store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply the bundled migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[tracing::instrument(skip(self, job), fields(db.table = "conversion_jobs", db.operation = "insert", job_id = %job.id))]
    async fn create_job(&self, job: &ConversionJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversion_jobs (id, name, status, total_count, processed_count, deletion_in_progress, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(job.status.to_string())
        .bind(job.total_count as i64)
        .bind(job.processed_count as i64)
        .bind(job.deletion_in_progress)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert job")?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "conversion_jobs", db.operation = "select"))]
    async fn get_job(&self, job_id: Uuid) -> Result<Option<ConversionJob>> {
        let row = sqlx::query_as::<Postgres, JobRow>(&format!(
            "SELECT {} FROM conversion_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job")?;

        row.map(ConversionJob::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "conversion_jobs", db.operation = "delete"))]
    async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversion_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete job")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "conversion_jobs", db.operation = "update"))]
    async fn advance_job_status(&self, job_id: Uuid, next: JobStatus) -> Result<Option<JobStatus>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM conversion_jobs WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to lock job")?;

        let Some(current) = current else {
            return Ok(None);
        };
        let current: JobStatus = current.parse()?;

        if current == next || !current.can_transition_to(next) {
            tx.commit().await.context("Failed to commit transaction")?;
            return Ok(Some(current));
        }

        sqlx::query("UPDATE conversion_jobs SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(next.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to update job status")?;

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(Some(next))
    }

    async fn set_deletion_guard(&self, job_id: Uuid, in_progress: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversion_jobs SET deletion_in_progress = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .bind(in_progress)
        .execute(&self.pool)
        .await
        .context("Failed to update deletion guard")?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_processed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE conversion_jobs SET processed_count = 0, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .context("Failed to reset processed count")?;
        Ok(())
    }

    async fn increment_processed(&self, job_id: Uuid, by: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conversion_jobs
            SET processed_count = LEAST(processed_count + $2, total_count),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(by as i64)
        .execute(&self.pool)
        .await
        .context("Failed to increment processed count")?;
        Ok(())
    }

    #[tracing::instrument(skip(self, rows), fields(db.table = "conversion_media", db.operation = "insert", count = rows.len()))]
    async fn register_media(&self, job_id: Uuid, rows: Vec<NewMedia>) -> Result<Vec<ConversionMedia>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let count = rows.len() as i64;
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let media = sqlx::query_as::<Postgres, MediaRow>(&format!(
                r#"
                INSERT INTO conversion_media
                    (id, job_id, folder_path, original_filename, original_key, size_bytes, fast_path, upload_completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                RETURNING {}
                "#,
                MEDIA_COLUMNS
            ))
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(&row.folder_path)
            .bind(&row.original_filename)
            .bind(&row.original_key)
            .bind(row.size_bytes as i64)
            .bind(row.fast_path)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to insert media")?;
            inserted.push(media);
        }

        let updated = sqlx::query(
            "UPDATE conversion_jobs SET total_count = total_count + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .bind(count)
        .execute(&mut *tx)
        .await
        .context("Failed to update job total")?;

        if updated.rows_affected() == 0 {
            return Err(anyhow::anyhow!("Job {} not found", job_id));
        }

        tx.commit().await.context("Failed to commit transaction")?;
        into_media(inserted)
    }

    async fn list_media(&self, job_id: Uuid) -> Result<Vec<ConversionMedia>> {
        let rows = sqlx::query_as::<Postgres, MediaRow>(&format!(
            "SELECT {} FROM conversion_media WHERE job_id = $1 ORDER BY seq ASC",
            MEDIA_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list media")?;

        into_media(rows)
    }

    async fn media_counts(&self, job_id: Uuid) -> Result<MediaCounts> {
        let (total, uploaded, converting, completed, failed): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE upload_completed_at IS NOT NULL),
                    COUNT(*) FILTER (WHERE conversion_status = 'converting'),
                    COUNT(*) FILTER (WHERE conversion_status = 'completed'),
                    COUNT(*) FILTER (WHERE conversion_status = 'failed')
                FROM conversion_media
                WHERE job_id = $1
                "#,
            )
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count media")?;

        Ok(MediaCounts {
            total: total as u64,
            uploaded: uploaded as u64,
            converting: converting as u64,
            completed: completed as u64,
            failed: failed as u64,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "conversion_media", db.operation = "claim"))]
    async fn claim_media(
        &self,
        job_id: Uuid,
        kind: ClaimKind,
        limit: usize,
        token: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<ConversionMedia>> {
        let (set_clause, precondition) = match kind {
            ClaimKind::Thumbnail => (
                "claim_token = $2, claimed_at = NOW()".to_string(),
                format!("conversion_status = 'pending' AND NOT ({})", THUMBNAILS_PRESENT),
            ),
            ClaimKind::Conversion => (
                "claim_token = $2, claimed_at = NOW(), conversion_status = 'converting', \
                 conversion_started_at = NOW()"
                    .to_string(),
                format!(
                    "conversion_status IN ('pending', 'converting') AND {} \
                     AND NOT ('converted' = ANY(renditions))",
                    THUMBNAILS_PRESENT
                ),
            ),
        };

        let sql = format!(
            r#"
            UPDATE conversion_media
            SET {set_clause}
            WHERE id IN (
                SELECT id FROM conversion_media
                WHERE job_id = $1
                  AND {precondition}
                  AND (claim_token IS NULL OR claimed_at IS NULL OR claimed_at < $4)
                ORDER BY seq ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {MEDIA_COLUMNS}
            "#
        );

        let rows = sqlx::query_as::<Postgres, MediaRow>(&sql)
            .bind(job_id)
            .bind(token)
            .bind(limit as i64)
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await
            .context("Failed to claim media")?;

        into_media(rows)
    }

    async fn count_outstanding(&self, job_id: Uuid, kind: ClaimKind) -> Result<u64> {
        let condition = match kind {
            ClaimKind::Thumbnail => {
                format!("conversion_status = 'pending' AND NOT ({})", THUMBNAILS_PRESENT)
            }
            ClaimKind::Conversion => "conversion_status IN ('pending', 'converting')".to_string(),
        };

        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM conversion_media WHERE job_id = $1 AND {}",
            condition
        ))
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count outstanding media")?;

        Ok(count as u64)
    }

    async fn finish_media(&self, media_id: Uuid, token: Uuid, outcome: &MediaOutcome) -> Result<bool> {
        let query = match outcome {
            MediaOutcome::Thumbnailed { renditions } => sqlx::query(
                r#"
                UPDATE conversion_media
                SET renditions = ARRAY(SELECT DISTINCT unnest(renditions || $3::text[])),
                    claim_token = NULL, claimed_at = NULL
                WHERE id = $1 AND claim_token = $2
                "#,
            )
            .bind(media_id)
            .bind(token)
            .bind(rendition_names(renditions)),
            MediaOutcome::Completed { renditions } => sqlx::query(
                r#"
                UPDATE conversion_media
                SET renditions = ARRAY(SELECT DISTINCT unnest(renditions || $3::text[])),
                    conversion_status = 'completed', conversion_completed_at = NOW(),
                    error_message = NULL, claim_token = NULL, claimed_at = NULL
                WHERE id = $1 AND claim_token = $2
                "#,
            )
            .bind(media_id)
            .bind(token)
            .bind(rendition_names(renditions)),
            MediaOutcome::Failed { error } => sqlx::query(
                r#"
                UPDATE conversion_media
                SET conversion_status = 'failed', conversion_completed_at = NOW(),
                    error_message = $3, claim_token = NULL, claimed_at = NULL
                WHERE id = $1 AND claim_token = $2
                "#,
            )
            .bind(media_id)
            .bind(token)
            .bind(error.clone()),
        };

        let result = query
            .execute(&self.pool)
            .await
            .context("Failed to finish media")?;
        Ok(result.rows_affected() > 0)
    }

    async fn repair_media(&self, media_id: Uuid, stale_before: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE conversion_media
            SET conversion_status = 'completed', conversion_completed_at = NOW(),
                renditions = ARRAY(SELECT DISTINCT unnest(renditions || ARRAY['converted']::text[])),
                claim_token = NULL, claimed_at = NULL
            WHERE id = $1
              AND conversion_status = 'converting'
              AND (claimed_at IS NULL OR claimed_at < $2)
            "#,
        )
        .bind(media_id)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .context("Failed to repair media")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_media(&self, media_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM conversion_media WHERE id = $1")
            .bind(media_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete media")?;
        Ok(())
    }
}
