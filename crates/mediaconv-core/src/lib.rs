//! mediaconv core library
//!
//! Domain models, error types, configuration, name sanitization and the
//! advisory progress-cache contract shared by every mediaconv crate.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod sanitize;
pub mod task_error;
pub mod validation;

// Re-export commonly used types
pub use cache::{KeyValueCache, ProgressTracker};
pub use config::{PipelineConfig, TaskQueueSettings};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use task_error::{TaskError, TaskResultExt};
pub use validation::ValidationError;
