//! Error types for the worker pool

use std::sync::Arc;

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// What a user callable returns.
///
/// An `Err` terminates the task in the failed state; the error is stored on
/// the task and surfaced through [`Task::error`](crate::task::Task::error).
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Errors raised by pool infrastructure.
///
/// Failures *inside* user callables are never raised through this type;
/// they are captured on the task itself as a [`TaskError`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration rejected at construction time.
    #[error("invalid config: {0}")]
    ConfigInvalid(&'static str),

    /// An admission or wait observed that the pool is stopping.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker thread")]
    WorkerSpawn(#[source] std::io::Error),

    /// One or more tracked tasks failed; raised only on explicit request
    /// from [`ChildPool::throw_aggregate`](crate::child::ChildPool::throw_aggregate).
    #[error("{} task(s) failed", .0.len())]
    Aggregate(Vec<Arc<TaskError>>),
}

/// Terminal failure of a single task, stored on the task that caused it.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The callable returned an error.
    #[error("task failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),

    /// The callable panicked; the payload message is preserved.
    #[error("task panicked: {0}")]
    Panicked(String),
}
