//! Work items and their completion state machine
//!
//! A [`Task`] is created at enqueue time and handed back to the caller as
//! an `Arc`; the handle is the sole mechanism to observe completion. The
//! state machine is monotonic: once a task reaches a terminal state it
//! never transitions again, the completion hook fires exactly once, and
//! every waiter eventually observes the terminal state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{PoolError, TaskError, TaskResult};
use crate::parking::AutoResetEvent;
use crate::pool::PoolShared;

pub(crate) type Thunk = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// Hook invoked exactly once when a task reaches a terminal state.
pub type CompletionHook = Box<dyn FnOnce(&Task) + Send + 'static>;

/// Unique identifier of a task within its pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    pub(crate) const fn new(id: u64) -> Self {
        TaskId(id)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// On the backlog, not yet claimed by a worker.
    Pending = 0,

    /// Claimed by a worker; the callable is executing.
    Running = 1,

    /// The callable returned successfully.
    Done = 2,

    /// The callable returned an error or panicked.
    Failed = 3,

    /// Aborted before a worker claimed it; the callable never ran.
    Aborted = 4,
}

impl TaskState {
    /// Check if this state is terminal.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Aborted)
    }
}

impl From<u8> for TaskState {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Done,
            3 => TaskState::Failed,
            4 => TaskState::Aborted,
            _ => TaskState::Pending, // Default for invalid values
        }
    }
}

/// Optional attributes attached to a task at enqueue time.
///
/// ```rust
/// use crew::{TaskOptions, ThreadPool, PoolConfig};
///
/// # fn main() -> Result<(), crew::PoolError> {
/// let pool = ThreadPool::new(PoolConfig::new().initial_workers(1))?;
/// let opts = TaskOptions::new()
///     .name("checkpoint")
///     .on_complete(|task| println!("{:?} finished", task.name()));
/// let task = pool.enqueue_opts(|| Ok(()), opts)?;
/// task.wait()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TaskOptions {
    pub(crate) name: Option<String>,
    pub(crate) on_complete: Option<CompletionHook>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a user label, carried on the task for diagnostics.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Invoke `hook` exactly once when the task reaches a terminal state,
    /// from whichever thread drove the transition. Fires for aborted
    /// tasks as well as executed ones.
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        self.on_complete = Some(Box::new(hook));
        self
    }
}

#[derive(Default)]
struct Timing {
    started_at: Option<Instant>,
    wall: Option<Duration>,
    cpu: Option<Duration>,
}

/// A unit of work accepted by the pool.
///
/// Shared between the enqueuing caller, the backlog, and the executing
/// worker. All accessors are safe to call from any thread at any time.
pub struct Task {
    id: TaskId,
    name: Option<String>,
    thunk: Mutex<Option<Thunk>>,
    hook: Mutex<Option<CompletionHook>>,
    state: AtomicU8,
    error: Mutex<Option<Arc<TaskError>>>,
    timing: Mutex<Timing>,
    done: AutoResetEvent,
    shared: Arc<PoolShared>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        name: Option<String>,
        thunk: Thunk,
        hook: Option<CompletionHook>,
        shared: Arc<PoolShared>,
    ) -> Self {
        Self {
            id,
            name,
            thunk: Mutex::new(Some(thunk)),
            hook: Mutex::new(hook),
            state: AtomicU8::new(TaskState::Pending as u8),
            error: Mutex::new(None),
            timing: Mutex::new(Timing::default()),
            done: AutoResetEvent::new(),
            shared,
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// User label supplied at enqueue, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current state. May be stale by the time the caller acts on it,
    /// except that terminal states are final.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::Acquire))
    }

    /// Check if the task has reached any terminal state.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state().is_terminal()
    }

    /// Check if the task was aborted before a worker claimed it.
    #[inline]
    pub fn was_aborted(&self) -> bool {
        self.state() == TaskState::Aborted
    }

    /// Check if the callable returned an error or panicked.
    #[inline]
    pub fn had_error(&self) -> bool {
        self.state() == TaskState::Failed
    }

    /// The captured failure, present iff [`had_error`](Self::had_error).
    pub fn error(&self) -> Option<Arc<TaskError>> {
        self.error.lock().clone()
    }

    /// Instant the callable was invoked (not enqueued). `None` until a
    /// worker claims the task.
    pub fn start_at(&self) -> Option<Instant> {
        self.timing.lock().started_at
    }

    /// Wall-clock execution time. Zero when the task never reached a
    /// worker (aborted before start, or still pending/running).
    pub fn wall_duration(&self) -> Duration {
        self.timing.lock().wall.unwrap_or_default()
    }

    /// CPU time consumed by the callable, when the platform can measure
    /// per-thread CPU time.
    pub fn cpu_duration(&self) -> Option<Duration> {
        self.timing.lock().cpu
    }

    /// Abort a pending task.
    ///
    /// Returns `true` and completes the task (hook and waiters fire) only
    /// if the task had not yet been claimed by a worker. Aborting a
    /// running or already-terminal task returns `false` and changes
    /// nothing; a running callable is never interrupted.
    pub fn abort(&self) -> bool {
        let swapped = self.state.compare_exchange(
            TaskState::Pending as u8,
            TaskState::Aborted as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if swapped.is_ok() {
            self.complete();
            true
        } else {
            false
        }
    }

    /// Block until the task reaches a terminal state.
    ///
    /// Fails with [`PoolError::ShuttingDown`] if the pool begins stopping
    /// while the task is still incomplete.
    pub fn wait(&self) -> Result<(), PoolError> {
        let mut spins = 0u32;
        loop {
            if self.is_complete() {
                return Ok(());
            }
            if self.shared.is_stopping() {
                return Err(PoolError::ShuttingDown);
            }
            if spins < self.shared.spin_count {
                spins += 1;
                std::hint::spin_loop();
            } else {
                self.done.wait_timeout(self.shared.park_wait);
                spins = 0;
            }
        }
    }

    /// Block up to `timeout`. Returns `Ok(true)` on completion, `Ok(false)`
    /// on timeout (the task keeps running; a timeout cancels nothing).
    pub fn wait_for(&self, timeout: Duration) -> Result<bool, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;
        loop {
            if self.is_complete() {
                return Ok(true);
            }
            if self.shared.is_stopping() {
                return Err(PoolError::ShuttingDown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            if spins < self.shared.spin_count {
                spins += 1;
                std::hint::spin_loop();
            } else {
                self.done.wait_timeout(self.shared.park_wait.min(deadline - now));
                spins = 0;
            }
        }
    }

    /// Like [`wait`](Self::wait), but every `interval` without completion
    /// `progress` is invoked. A `false` return from the hook ends the wait
    /// with `Ok(false)` without aborting the task.
    pub fn wait_with_progress<F>(&self, interval: Duration, mut progress: F) -> Result<bool, PoolError>
    where
        F: FnMut(&Task) -> bool,
    {
        let mut next_report = Instant::now() + interval;
        let mut spins = 0u32;
        loop {
            if self.is_complete() {
                return Ok(true);
            }
            if self.shared.is_stopping() {
                return Err(PoolError::ShuttingDown);
            }
            let now = Instant::now();
            if now >= next_report {
                if !progress(self) {
                    return Ok(false);
                }
                next_report += interval;
                continue;
            }
            if spins < self.shared.spin_count {
                spins += 1;
                std::hint::spin_loop();
            } else {
                self.done
                    .wait_timeout(self.shared.park_wait.min(next_report - now));
                spins = 0;
            }
        }
    }

    // Worker-side operations

    /// Claim the task for execution. Loses to a concurrent abort.
    pub(crate) fn try_begin(&self, at: Instant) -> bool {
        let swapped = self.state.compare_exchange(
            TaskState::Pending as u8,
            TaskState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if swapped.is_ok() {
            self.timing.lock().started_at = Some(at);
            true
        } else {
            false
        }
    }

    pub(crate) fn take_thunk(&self) -> Option<Thunk> {
        self.thunk.lock().take()
    }

    /// Record durations, publish the terminal state, wake waiters, fire
    /// the hook. Called exactly once, by the worker that ran the callable.
    pub(crate) fn finish(
        &self,
        error: Option<Arc<TaskError>>,
        wall: Duration,
        cpu: Option<Duration>,
    ) {
        {
            let mut timing = self.timing.lock();
            timing.wall = Some(wall);
            timing.cpu = cpu;
        }
        let terminal = if error.is_some() {
            TaskState::Failed
        } else {
            TaskState::Done
        };
        if error.is_some() {
            *self.error.lock() = error;
        }
        self.state.store(terminal as u8, Ordering::Release);
        self.complete();
    }

    /// Single-shot completion: wake waiters, then run the hook.
    fn complete(&self) {
        self.done.set();
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook(self);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
