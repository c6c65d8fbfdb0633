use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::task::Task;

/// Hands tasks to whatever executes them.
///
/// Implementations provide at-least-once execution, an optional start delay,
/// a per-invocation timeout and bounded retry.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: Task, delay: Option<Duration>) -> Result<()>;
}
