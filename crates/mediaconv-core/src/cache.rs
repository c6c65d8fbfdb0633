//! Advisory key-value cache contract and the progress tracker built on it.
//!
//! Nothing read from here decides whether a job is done; callers fall back
//! to row-store counts when an entry is missing or stale.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{ProgressPhase, ProgressSnapshot};

#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn put(&self, key: &str, value: String, ttl: Duration);

    async fn forget(&self, key: &str);
}

pub fn progress_key(job_id: Uuid, phase: ProgressPhase) -> String {
    format!("progress:{}:{}", job_id, phase)
}

/// Publishes and reads per-phase progress snapshots. Last write wins.
#[derive(Clone)]
pub struct ProgressTracker {
    cache: Arc<dyn KeyValueCache>,
    ttl: Duration,
}

impl ProgressTracker {
    pub fn new(cache: Arc<dyn KeyValueCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn publish(&self, job_id: Uuid, phase: ProgressPhase, processed: u64, total: u64) {
        let snapshot = ProgressSnapshot::new(processed, total);
        match serde_json::to_string(&snapshot) {
            Ok(value) => {
                self.cache
                    .put(&progress_key(job_id, phase), value, self.ttl)
                    .await
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, phase = %phase, error = %e, "Failed to encode progress")
            }
        }
    }

    pub async fn read(&self, job_id: Uuid, phase: ProgressPhase) -> Option<ProgressSnapshot> {
        let raw = self.cache.get(&progress_key(job_id, phase)).await?;
        serde_json::from_str(&raw).ok()
    }

    /// Drop every phase entry of a job.
    pub async fn clear(&self, job_id: Uuid) {
        for phase in ProgressPhase::ALL {
            self.cache.forget(&progress_key(job_id, phase)).await;
        }
    }
}
