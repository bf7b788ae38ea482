//! # crew
//!
//! A process-resident **active worker pool**: a set of pre-spawned OS
//! threads that dequeue user-supplied callables from a single shared FIFO
//! backlog, execute them, and publish per-item completion state back to
//! the caller.
//!
//! Built for programs that need finer control than a generic runtime
//! thread pool:
//!
//! - **Bounded backlogs**: admission blocks (spin-then-park) while the
//!   queue is at its cap, giving natural backpressure.
//! - **Per-task handles**: blocking, timed, and progress-reporting waits;
//!   abort of not-yet-started work; captured errors and panics; wall and
//!   CPU time per item.
//! - **Elastic sizing**: a controller thread grows the pool under
//!   sustained overload (with exponential backoff on its trigger
//!   threshold) and shrinks it again after sustained idleness.
//! - **Child pools**: typed facades that group a batch of tasks, enforce
//!   a second, tighter backlog bound, and offer batch waits, aborts, and
//!   aggregate error reporting.
//!
//! # Quick start
//!
//! ```rust
//! use crew::{PoolConfig, ThreadPool};
//!
//! # fn main() -> Result<(), crew::PoolError> {
//! let pool = ThreadPool::new(PoolConfig::new().initial_workers(2).max_backlog(128))?;
//!
//! let task = pool.enqueue(|| {
//!     // ... do some work ...
//!     Ok(())
//! })?;
//! task.wait()?;
//! assert!(task.is_complete() && !task.had_error());
//!
//! pool.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Batched, typed work
//!
//! ```rust
//! use crew::{PoolConfig, ThreadPool};
//!
//! # fn main() -> Result<(), crew::PoolError> {
//! let pool = ThreadPool::new(PoolConfig::new().initial_workers(2))?;
//! let mut batch = pool.child_pool::<u32>(16);
//!
//! for chunk in 0..4 {
//!     batch.enqueue_with(chunk, |chunk| {
//!         // typed payload, no downcasts
//!         let _ = chunk * 2;
//!         Ok(())
//!     })?;
//! }
//! batch.wait_all()?;
//! batch.throw_aggregate()?;
//! # pool.stop();
//! # Ok(())
//! # }
//! ```
//!
//! Callable failures are **captured, not propagated**: a task whose
//! callable returns `Err` or panics completes in the failed state, its
//! completion hook still runs, and `wait` returns normally; inspect
//! [`Task::had_error`] and [`Task::error`]. Only pool infrastructure
//! conditions (shutdown observed by an admission or a wait) surface as
//! [`PoolError`].

pub mod child;
pub mod config;
pub mod error;
pub mod platform;
pub mod pool;
pub mod task;
pub mod worker;

mod backlog;
mod parking;
mod scaler;

// Re-exports
pub use child::ChildPool;
pub use config::{PoolConfig, ThreadPriority};
pub use error::{PoolError, PoolResult, TaskError, TaskResult};
pub use pool::ThreadPool;
pub use task::{CompletionHook, Task, TaskId, TaskOptions, TaskState};
pub use worker::{WorkerInfo, WorkerState};

/// Convenience re-exports for the common case.
pub mod prelude {
    pub use crate::child::ChildPool;
    pub use crate::config::{PoolConfig, ThreadPriority};
    pub use crate::error::{PoolError, PoolResult, TaskResult};
    pub use crate::pool::ThreadPool;
    pub use crate::task::{Task, TaskOptions, TaskState};
}
