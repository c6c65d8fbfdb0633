//! mediaconv background work
//!
//! Tasks, the in-process queue that runs them, and the chunked workers that
//! turn uploaded media into thumbnails and normalized JPEGs.

pub mod chunk;
pub mod context;
pub mod conversion;
pub mod deletion;
pub mod dispatcher;
pub mod events;
pub mod queue;
pub mod reclaim;
pub mod task;
pub mod thumbnail;

pub use chunk::{ChunkOutcome, ChunkRunner, ChunkStep, ItemTransform};
pub use context::{TaskHandlerContext, WorkerContext, WorkerDeps};
pub use conversion::ConversionTransform;
pub use deletion::DeletionWorker;
pub use dispatcher::TaskDispatcher;
pub use events::{JobEvent, JobEventBus, JobEventKind};
pub use queue::TaskQueue;
pub use reclaim::{MemoryReclaimer, TracingReclaimer};
pub use task::Task;
pub use thumbnail::ThumbnailTransform;
