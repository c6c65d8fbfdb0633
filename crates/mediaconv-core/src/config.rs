//! Configuration module
//!
//! Pipeline, task-queue and server settings loaded from the environment
//! (after `.env`, if present). Every key has a default so a bare environment
//! starts a working single-node setup.

use chrono::{DateTime, Utc};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const CHUNK_SIZE: usize = 30;
const RECHUNK_DELAY_MS: u64 = 2000;
const RECLAIM_EVERY: usize = 10;
const CLAIM_TTL_SECS: u64 = 900;
const MAX_DIMENSION: u32 = 4096;
const JPEG_QUALITY: u8 = 85;
const THUMB_SMALL_SIZE: u32 = 320;
const THUMB_LARGE_SIZE: u32 = 1280;
const MAX_ENTRY_SIZE_MB: u64 = 50;
const MAX_ARCHIVE_UNCOMPRESSED_MB: u64 = 2048;
const MAX_UPLOAD_SIZE_MB: u64 = 2048;
const PROGRESS_TTL_SECS: u64 = 3600;
const TASK_QUEUE_MAX_WORKERS: usize = 4;
const TASK_TIMEOUT_SECS: u64 = 600;
const TASK_MAX_ATTEMPTS: u32 = 3;
const TASK_RETRY_BACKOFF_SECS: &str = "30,60,120";
const DEFAULT_ALLOWED_EXTENSIONS: &str = "jpg,jpeg,png,gif,webp,bmp,tif,tiff";

const MB: u64 = 1024 * 1024;

/// Execution policy of the in-process task queue.
#[derive(Clone, Debug)]
pub struct TaskQueueSettings {
    pub max_workers: usize,
    /// Per-invocation timeout.
    pub timeout: Duration,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before attempt n+1 is `backoff[n-1]`; the last entry repeats.
    pub backoff: Vec<Duration>,
}

impl TaskQueueSettings {
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (failed_attempts.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

impl Default for TaskQueueSettings {
    fn default() -> Self {
        Self {
            max_workers: TASK_QUEUE_MAX_WORKERS,
            timeout: Duration::from_secs(TASK_TIMEOUT_SECS),
            max_attempts: TASK_MAX_ATTEMPTS,
            backoff: parse_backoff(TASK_RETRY_BACKOFF_SECS),
        }
    }
}

/// Pipeline configuration
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    /// Fixed delay before a chunk re-arms itself.
    pub rechunk_delay: Duration,
    /// Force a memory-reclamation pass every N items.
    pub reclaim_every: usize,
    /// Claims older than this are considered abandoned.
    pub claim_ttl: Duration,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub thumb_small_size: u32,
    pub thumb_large_size: u32,
    pub max_entry_size_bytes: u64,
    pub max_archive_uncompressed_bytes: u64,
    pub max_upload_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub progress_ttl: Duration,
    pub task_queue: TaskQueueSettings,
    pub storage_path: PathBuf,
    pub storage_base_url: String,
    pub database_url: Option<String>,
    pub server_port: u16,
    /// Serve downloads as a live stream; otherwise build a temp file first.
    pub archive_streaming: bool,
    /// Emit JSON log lines (`LOG_FORMAT=json`).
    pub log_json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            rechunk_delay: Duration::from_millis(RECHUNK_DELAY_MS),
            reclaim_every: RECLAIM_EVERY,
            claim_ttl: Duration::from_secs(CLAIM_TTL_SECS),
            max_dimension: MAX_DIMENSION,
            jpeg_quality: JPEG_QUALITY,
            thumb_small_size: THUMB_SMALL_SIZE,
            thumb_large_size: THUMB_LARGE_SIZE,
            max_entry_size_bytes: MAX_ENTRY_SIZE_MB * MB,
            max_archive_uncompressed_bytes: MAX_ARCHIVE_UNCOMPRESSED_MB * MB,
            max_upload_size_bytes: MAX_UPLOAD_SIZE_MB * MB,
            allowed_extensions: parse_list(DEFAULT_ALLOWED_EXTENSIONS),
            progress_ttl: Duration::from_secs(PROGRESS_TTL_SECS),
            task_queue: TaskQueueSettings::default(),
            storage_path: PathBuf::from("./data/media"),
            storage_base_url: "http://localhost:3000/media".to_string(),
            database_url: None,
            server_port: 3000,
            archive_streaming: true,
            log_json: false,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_backoff(raw: &str) -> Vec<Duration> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .collect()
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = PipelineConfig::default();

        let task_queue = TaskQueueSettings {
            max_workers: env_or("TASK_QUEUE_MAX_WORKERS", TASK_QUEUE_MAX_WORKERS),
            timeout: Duration::from_secs(env_or("TASK_TIMEOUT_SECS", TASK_TIMEOUT_SECS)),
            max_attempts: env_or("TASK_MAX_ATTEMPTS", TASK_MAX_ATTEMPTS),
            backoff: parse_backoff(
                &env::var("TASK_RETRY_BACKOFF_SECS")
                    .unwrap_or_else(|_| TASK_RETRY_BACKOFF_SECS.to_string()),
            ),
        };

        let config = Self {
            chunk_size: env_or("CHUNK_SIZE", CHUNK_SIZE),
            rechunk_delay: Duration::from_millis(env_or("RECHUNK_DELAY_MS", RECHUNK_DELAY_MS)),
            reclaim_every: env_or("RECLAIM_EVERY", RECLAIM_EVERY),
            claim_ttl: Duration::from_secs(env_or("CLAIM_TTL_SECS", CLAIM_TTL_SECS)),
            max_dimension: env_or("MAX_DIMENSION", MAX_DIMENSION),
            jpeg_quality: env_or("JPEG_QUALITY", JPEG_QUALITY),
            thumb_small_size: env_or("THUMB_SMALL_SIZE", THUMB_SMALL_SIZE),
            thumb_large_size: env_or("THUMB_LARGE_SIZE", THUMB_LARGE_SIZE),
            max_entry_size_bytes: env_or("MAX_ENTRY_SIZE_MB", MAX_ENTRY_SIZE_MB) * MB,
            max_archive_uncompressed_bytes: env_or(
                "MAX_ARCHIVE_UNCOMPRESSED_MB",
                MAX_ARCHIVE_UNCOMPRESSED_MB,
            ) * MB,
            max_upload_size_bytes: env_or("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB) * MB,
            allowed_extensions: parse_list(
                &env::var("ALLOWED_EXTENSIONS")
                    .unwrap_or_else(|_| DEFAULT_ALLOWED_EXTENSIONS.to_string()),
            ),
            progress_ttl: Duration::from_secs(env_or("PROGRESS_TTL_SECS", PROGRESS_TTL_SECS)),
            task_queue,
            storage_path: env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            storage_base_url: env::var("STORAGE_BASE_URL").unwrap_or(defaults.storage_base_url),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            server_port: env::var("PORT")
                .unwrap_or_else(|_| defaults.server_port.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            archive_streaming: env_or("ARCHIVE_STREAMING", true),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("CHUNK_SIZE must be greater than zero"));
        }
        if self.reclaim_every == 0 {
            return Err(anyhow::anyhow!("RECLAIM_EVERY must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow::anyhow!("JPEG_QUALITY must be between 1 and 100"));
        }
        if self.max_dimension == 0 || self.thumb_small_size == 0 || self.thumb_large_size == 0 {
            return Err(anyhow::anyhow!("Image dimensions must be greater than zero"));
        }
        if self.thumb_small_size > self.thumb_large_size {
            return Err(anyhow::anyhow!(
                "THUMB_SMALL_SIZE must not exceed THUMB_LARGE_SIZE"
            ));
        }
        if self.max_entry_size_bytes > self.max_archive_uncompressed_bytes {
            return Err(anyhow::anyhow!(
                "MAX_ENTRY_SIZE_MB must not exceed MAX_ARCHIVE_UNCOMPRESSED_MB"
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSIONS must not be empty"));
        }
        if self.task_queue.max_workers == 0 {
            return Err(anyhow::anyhow!(
                "TASK_QUEUE_MAX_WORKERS must be greater than zero"
            ));
        }
        if self.task_queue.max_attempts == 0 {
            return Err(anyhow::anyhow!("TASK_MAX_ATTEMPTS must be at least 1"));
        }
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }
        Ok(())
    }

    /// Claims taken before this instant are treated as abandoned.
    pub fn stale_claim_cutoff(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.claim_ttl).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.allowed_extensions.iter().any(|e| *e == ext)
    }
}
