//! Task handler context.
//!
//! The queue holds a weak reference to a [`TaskHandlerContext`] and calls
//! `dispatch_task` for every task it runs. [`WorkerContext`] is the
//! implementation that drives the chunk state machine: it is the only place
//! a chunk gets re-dispatched.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::sync::Arc;

use mediaconv_core::models::JobStatus;
use mediaconv_core::{PipelineConfig, ProgressTracker, TaskResultExt};
use mediaconv_db::JobStore;
use mediaconv_processing::{ImagePipeline, PipelineSettings};
use mediaconv_storage::Storage;

use crate::chunk::{ChunkOutcome, ChunkRunner, ChunkStep};
use crate::conversion::ConversionTransform;
use crate::deletion::DeletionWorker;
use crate::dispatcher::TaskDispatcher;
use crate::events::{JobEventBus, JobEventKind};
use crate::reclaim::MemoryReclaimer;
use crate::task::Task;
use crate::thumbnail::ThumbnailTransform;

#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Run one task to completion.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<()>;

    /// Called once a task has failed for good (retries exhausted or
    /// unrecoverable error).
    async fn on_terminal_failure(self: Arc<Self>, task: &Task, error: &anyhow::Error);
}

/// Shared collaborators of the workers.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<dyn Storage>,
    pub progress: ProgressTracker,
    pub events: JobEventBus,
    pub reclaimer: Arc<dyn MemoryReclaimer>,
    pub config: Arc<PipelineConfig>,
}

pub struct WorkerContext {
    store: Arc<dyn JobStore>,
    events: JobEventBus,
    dispatcher: Arc<dyn TaskDispatcher>,
    runner: ChunkRunner,
    thumbnails: ThumbnailTransform,
    conversion: ConversionTransform,
    deletion: DeletionWorker,
}

impl WorkerContext {
    pub fn new(deps: WorkerDeps, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        let pipeline = Arc::new(ImagePipeline::new(PipelineSettings::from(
            deps.config.as_ref(),
        )));

        Self {
            store: deps.store.clone(),
            events: deps.events.clone(),
            dispatcher,
            runner: ChunkRunner::new(
                deps.store.clone(),
                deps.storage.clone(),
                deps.progress.clone(),
                deps.events.clone(),
                deps.reclaimer.clone(),
                deps.config.clone(),
            ),
            thumbnails: ThumbnailTransform::new(deps.storage.clone(), pipeline.clone()),
            conversion: ConversionTransform::new(deps.storage.clone(), pipeline),
            deletion: DeletionWorker::new(
                deps.store,
                deps.storage,
                deps.progress,
                deps.events,
                deps.reclaimer,
                deps.config.reclaim_every,
            ),
        }
    }

    /// Run a chunk task and re-dispatch it when the outcome asks for it.
    async fn drive_chunk(&self, task: Task) -> Result<ChunkOutcome> {
        let outcome = match task {
            Task::Thumbnails { job_id } => self.runner.run(job_id, &self.thumbnails).await,
            Task::Conversion { job_id } => self.runner.run(job_id, &self.conversion).await,
            Task::Deletion { .. } => anyhow::bail!("Deletion is not a chunk task"),
        }
        .recoverable()?;

        if let ChunkStep::Rearm { delay } = outcome.next {
            self.dispatcher
                .dispatch(task, Some(delay))
                .await
                .context("Failed to re-arm chunk")
                .recoverable()?;
        }

        Ok(outcome)
    }
}

#[async_trait]
impl TaskHandlerContext for WorkerContext {
    #[tracing::instrument(skip(self), fields(task.type = task.task_type(), job_id = %task.job_id()))]
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<()> {
        match *task {
            Task::Thumbnails { .. } | Task::Conversion { .. } => {
                let outcome = self.drive_chunk(*task).await?;
                tracing::debug!(
                    processed = outcome.processed,
                    remaining = outcome.remaining,
                    next = ?outcome.next,
                    "Chunk finished"
                );
                Ok(())
            }
            Task::Deletion { job_id } => {
                self.deletion.run(job_id).await.recoverable()?;
                Ok(())
            }
        }
    }

    async fn on_terminal_failure(self: Arc<Self>, task: &Task, error: &anyhow::Error) {
        let job_id = task.job_id();
        tracing::error!(job_id = %job_id, task = %task, error = %format!("{:#}", error), "Task failed permanently");

        match task {
            Task::Deletion { .. } => self.deletion.abandon(job_id).await,
            Task::Thumbnails { .. } | Task::Conversion { .. } => {
                let before = match self.store.get_job(job_id).await {
                    Ok(Some(job)) => job.status,
                    Ok(None) => return,
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to load job after task failure");
                        return;
                    }
                };
                if before == JobStatus::Failed {
                    return;
                }
                match self.store.advance_job_status(job_id, JobStatus::Failed).await {
                    Ok(Some(JobStatus::Failed)) => {
                        self.events.publish(job_id, JobEventKind::Failed)
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to mark job failed")
                    }
                }
            }
        }
    }
}
