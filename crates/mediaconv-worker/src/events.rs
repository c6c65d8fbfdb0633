//! Completion signals for jobs.
//!
//! Workers publish an event when a phase drains, a job fails or is deleted.
//! Nothing is retained: a subscriber only sees events sent after it
//! subscribed, so callers subscribe before checking state.

use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    ThumbnailsDone,
    ConversionDone,
    Deleted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub kind: JobEventKind,
}

#[derive(Clone)]
pub struct JobEventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl JobEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, job_id: Uuid, kind: JobEventKind) {
        tracing::debug!(job_id = %job_id, kind = ?kind, "Job event");
        // No subscribers is fine.
        let _ = self.sender.send(JobEvent { job_id, kind });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Wait for the next event of `job_id` whose kind is in `kinds`.
    ///
    /// Returns `None` on timeout.
    pub async fn wait_for(
        mut receiver: broadcast::Receiver<JobEvent>,
        job_id: Uuid,
        kinds: &[JobEventKind],
        timeout: Duration,
    ) -> Option<JobEvent> {
        let wait = async {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.job_id == job_id && kinds.contains(&event.kind) => {
                        return Some(event)
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Job event subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waits_for_matching_event_only() {
        let bus = JobEventBus::new();
        let job_id = Uuid::new_v4();
        let receiver = bus.subscribe();

        bus.publish(Uuid::new_v4(), JobEventKind::ConversionDone);
        bus.publish(job_id, JobEventKind::ThumbnailsDone);
        bus.publish(job_id, JobEventKind::ConversionDone);

        let event = JobEventBus::wait_for(
            receiver,
            job_id,
            &[JobEventKind::ConversionDone, JobEventKind::Failed],
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(
            event,
            Some(JobEvent {
                job_id,
                kind: JobEventKind::ConversionDone
            })
        );
    }

    #[tokio::test]
    async fn times_out_without_event() {
        let bus = JobEventBus::new();
        let event = JobEventBus::wait_for(
            bus.subscribe(),
            Uuid::new_v4(),
            &[JobEventKind::Deleted],
            Duration::from_millis(20),
        )
        .await;
        assert!(event.is_none());
    }
}
