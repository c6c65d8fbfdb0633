//! Error wrapper carrying a retry hint for the task queue.

use std::fmt;

/// Failure raised by a task handler.
///
/// The queue downcasts handler errors to this type: unrecoverable failures
/// skip the remaining attempts, everything else is retried with backoff.
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    pub fn recoverable(inner: anyhow::Error) -> Self {
        Self {
            inner,
            recoverable: true,
        }
    }

    pub fn unrecoverable(inner: anyhow::Error) -> Self {
        Self {
            inner,
            recoverable: false,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Tag an `anyhow::Result` with a retry hint.
pub trait TaskResultExt<T> {
    fn unrecoverable(self) -> Result<T, anyhow::Error>;
    fn recoverable(self) -> Result<T, anyhow::Error>;
}

impl<T> TaskResultExt<T> for Result<T, anyhow::Error> {
    fn unrecoverable(self) -> Result<T, anyhow::Error> {
        self.map_err(|e| TaskError::unrecoverable(e).into())
    }

    fn recoverable(self) -> Result<T, anyhow::Error> {
        self.map_err(|e| TaskError::recoverable(e).into())
    }
}

/// Whether an error coming out of a handler should be retried.
pub fn is_recoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TaskError>()
        .map(TaskError::is_recoverable)
        .unwrap_or(true)
}
