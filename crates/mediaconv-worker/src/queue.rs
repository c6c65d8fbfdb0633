//! In-process task queue: bounded worker pool, delayed submission, timeout
//! and retry with backoff.
//!
//! Tasks live only in memory. A process restart loses queued work; stale
//! claims on media rows let a later dispatch pick it up again.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use mediaconv_core::task_error::is_recoverable;
use mediaconv_core::TaskQueueSettings;

use crate::context::TaskHandlerContext;
use crate::dispatcher::TaskDispatcher;
use crate::task::Task;

#[derive(Debug, Clone, Copy)]
struct QueuedTask {
    task: Task,
    /// 1-based attempt number of the next run.
    attempt: u32,
}

type Receivers = (mpsc::UnboundedReceiver<QueuedTask>, mpsc::Receiver<()>);

pub struct TaskQueue {
    settings: TaskQueueSettings,
    sender: mpsc::UnboundedSender<QueuedTask>,
    shutdown_tx: mpsc::Sender<()>,
    receivers: Mutex<Option<Receivers>>,
}

impl TaskQueue {
    /// Create a queue. Tasks submitted before [`start`](Self::start) are
    /// buffered.
    pub fn new(settings: TaskQueueSettings) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            settings,
            sender,
            shutdown_tx,
            receivers: Mutex::new(Some((receiver, shutdown_rx))),
        }
    }

    /// Spawn the worker pool. The context is held weakly; once it is dropped
    /// tasks are discarded.
    pub fn start(&self, context: Weak<dyn TaskHandlerContext>) {
        let receivers = match self.receivers.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some((receiver, shutdown_rx)) = receivers else {
            tracing::warn!("Task queue already started");
            return;
        };

        tokio::spawn(Self::worker_pool(
            receiver,
            shutdown_rx,
            self.sender.clone(),
            self.settings.clone(),
            context,
        ));
    }

    async fn worker_pool(
        mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
        mut shutdown_rx: mpsc::Receiver<()>,
        sender: mpsc::UnboundedSender<QueuedTask>,
        settings: TaskQueueSettings,
        context: Weak<dyn TaskHandlerContext>,
    ) {
        tracing::info!(
            max_workers = settings.max_workers,
            timeout_secs = settings.timeout.as_secs(),
            max_attempts = settings.max_attempts,
            "Task queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(settings.max_workers));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    break;
                }
                queued = receiver.recv() => {
                    let Some(queued) = queued else { break };
                    let Ok(permit) = semaphore.clone().acquire_owned().await else { break };

                    let sender = sender.clone();
                    let settings = settings.clone();
                    let context = context.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::process_task(queued, context, settings, sender).await;
                    });
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    #[tracing::instrument(skip(context, settings, sender), fields(task = %queued.task, attempt = queued.attempt))]
    async fn process_task(
        queued: QueuedTask,
        context: Weak<dyn TaskHandlerContext>,
        settings: TaskQueueSettings,
        sender: mpsc::UnboundedSender<QueuedTask>,
    ) {
        let Some(ctx) = context.upgrade() else {
            tracing::warn!("Task handler context dropped, discarding task");
            return;
        };

        let result = tokio::time::timeout(settings.timeout, ctx.clone().dispatch_task(&queued.task)).await;

        let error = match result {
            Ok(Ok(())) => {
                tracing::debug!("Task completed");
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!("Task execution timed out after {:?}", settings.timeout),
        };

        let recoverable = is_recoverable(&error);
        tracing::error!(
            error = %format!("{:#}", error),
            recoverable,
            max_attempts = settings.max_attempts,
            "Task execution failed"
        );

        if recoverable && queued.attempt < settings.max_attempts {
            let backoff = settings.backoff_for(queued.attempt);
            tracing::info!(
                next_attempt = queued.attempt + 1,
                backoff_secs = backoff.as_secs_f64(),
                "Scheduling task retry"
            );
            let retry = QueuedTask {
                task: queued.task,
                attempt: queued.attempt + 1,
            };
            if Self::enqueue(&sender, retry, Some(backoff)).is_err() {
                tracing::warn!("Task queue closed, retry dropped");
            }
            return;
        }

        ctx.on_terminal_failure(&queued.task, &error).await;
    }

    fn enqueue(
        sender: &mpsc::UnboundedSender<QueuedTask>,
        queued: QueuedTask,
        delay: Option<Duration>,
    ) -> Result<()> {
        match delay.filter(|d| !d.is_zero()) {
            None => sender
                .send(queued)
                .map_err(|_| anyhow::anyhow!("Task queue is shut down")),
            Some(delay) => {
                if sender.is_closed() {
                    anyhow::bail!("Task queue is shut down");
                }
                let sender = sender.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if sender.send(queued).is_err() {
                        tracing::warn!(task = %queued.task, "Task queue closed before delayed task was due");
                    }
                });
                Ok(())
            }
        }
    }

    /// Stop taking new tasks. In-flight tasks run to completion.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[async_trait]
impl TaskDispatcher for TaskQueue {
    async fn dispatch(&self, task: Task, delay: Option<Duration>) -> Result<()> {
        tracing::debug!(task = %task, delay_ms = delay.map(|d| d.as_millis() as u64), "Task submitted");
        Self::enqueue(&self.sender, QueuedTask { task, attempt: 1 }, delay)
    }
}
