//! Periodic memory reclamation inside long chunks.

/// Called every `RECLAIM_EVERY` items by chunk and deletion workers.
pub trait MemoryReclaimer: Send + Sync {
    fn reclaim(&self, items_done: usize);
}

/// Per-item buffers are already released when each item finishes, so the
/// default pass only records where it ran.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReclaimer;

impl MemoryReclaimer for TracingReclaimer {
    fn reclaim(&self, items_done: usize) {
        tracing::trace!(items_done, "Memory reclamation pass");
    }
}

/// Counts items and fires the reclaimer on every `every`th one.
pub(crate) struct ReclaimSchedule<'a> {
    reclaimer: &'a dyn MemoryReclaimer,
    every: usize,
    done: usize,
}

impl<'a> ReclaimSchedule<'a> {
    pub(crate) fn new(reclaimer: &'a dyn MemoryReclaimer, every: usize) -> Self {
        Self {
            reclaimer,
            every: every.max(1),
            done: 0,
        }
    }

    pub(crate) fn item_done(&mut self) {
        self.done += 1;
        if self.done % self.every == 0 {
            self.reclaimer.reclaim(self.done);
        }
    }
}
