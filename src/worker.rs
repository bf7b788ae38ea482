//! Worker slots and the worker execution loop
//!
//! Each slot is one pre-spawned OS thread running [`run`]: pop a task,
//! execute it, publish its completion, repeat; spin briefly when the
//! backlog is empty, then park with a finite timeout so the stop flags
//! are polled with bounded latency.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::TaskError;
use crate::parking::AutoResetEvent;
use crate::platform::{self, ThreadCpuClock};
use crate::pool::PoolInner;
use crate::task::Task;

/// Reported state of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for work (spinning or parked).
    Idle = 0,
    /// A user callable is on the thread right now.
    Executing = 1,
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            1 => WorkerState::Executing,
            _ => WorkerState::Idle,
        }
    }
}

/// Point-in-time snapshot of one worker, from
/// [`ThreadPool::workers`](crate::pool::ThreadPool::workers).
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    /// Managed id, unique for the lifetime of the pool.
    pub id: usize,
    pub state: WorkerState,
    /// Tasks this worker has finished (including failed ones).
    pub tasks_executed: u64,
    /// Total CPU time consumed by the worker thread, when the platform
    /// can sample other threads' CPU clocks.
    pub cpu_time: Option<Duration>,
}

pub(crate) struct WorkerSlot {
    id: usize,
    state: AtomicU8,
    keep_running: AtomicBool,
    park: AutoResetEvent,
    handle: Mutex<Option<JoinHandle<()>>>,
    cpu_clock: OnceLock<Option<ThreadCpuClock>>,
    tasks_executed: AtomicU64,
}

impl WorkerSlot {
    pub fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(WorkerState::Idle as u8),
            keep_running: AtomicBool::new(true),
            park: AutoResetEvent::new(),
            handle: Mutex::new(None),
            cpu_clock: OnceLock::new(),
            tasks_executed: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state() == WorkerState::Idle
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::Acquire)
    }

    /// Ask this slot to exit its loop after the current item, if any.
    pub fn retire(&self) {
        self.keep_running.store(false, Ordering::Release);
    }

    pub fn unpark(&self) {
        self.park.set();
    }

    pub fn attach(&self, handle: JoinHandle<()>) {
        *self.handle.lock() = Some(handle);
    }

    pub fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().take()
    }

    pub fn info(&self) -> WorkerInfo {
        let cpu_time = self
            .cpu_clock
            .get()
            .copied()
            .flatten()
            .and_then(|clock| clock.sample());
        WorkerInfo {
            id: self.id,
            state: self.state(),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            cpu_time,
        }
    }
}

/// Worker thread entry point.
pub(crate) fn run(pool: Arc<PoolInner>, slot: Arc<WorkerSlot>) {
    let _ = slot.cpu_clock.set(ThreadCpuClock::current());
    platform::apply_priority(pool.config().worker_priority);
    trace!(worker = slot.id, "worker started");

    let spin_count = pool.config().spin_count;
    let park_wait = pool.config().park_wait;
    let mut spins = 0u32;

    while pool.keep_running() && slot.keep_running() {
        let Some(task) = pool.backlog().try_pop() else {
            if spins < spin_count {
                spins += 1;
                std::hint::spin_loop();
            } else {
                slot.park.wait_timeout(park_wait);
                spins = 0;
            }
            continue;
        };

        spins = 0;
        slot.set_state(WorkerState::Executing);
        execute(&task, &slot);
        slot.set_state(WorkerState::Idle);
    }

    trace!(worker = slot.id, "worker exiting");
}

/// Run one task to its terminal state. The backlog mutex is never held
/// here; panics are contained and recorded on the task.
fn execute(task: &Arc<Task>, slot: &WorkerSlot) {
    let started = Instant::now();
    if !task.try_begin(started) {
        // Aborted between pop and claim; abort already completed it.
        return;
    }

    let cpu_before = platform::thread_cpu_time();
    let outcome = match task.take_thunk() {
        Some(thunk) => catch_unwind(AssertUnwindSafe(thunk)),
        None => Ok(Ok(())),
    };
    let wall = started.elapsed();
    let cpu = match (cpu_before, platform::thread_cpu_time()) {
        (Some(before), Some(after)) => Some(after.saturating_sub(before)),
        _ => None,
    };

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            debug!(task = %task.id(), error = %e, "task failed");
            Some(Arc::new(TaskError::Failed(e)))
        }
        Err(payload) => {
            let message = panic_message(payload);
            warn!(task = %task.id(), panic = %message, "task panicked");
            Some(Arc::new(TaskError::Panicked(message)))
        }
    };

    task.finish(error, wall, cpu);
    slot.tasks_executed.fetch_add(1, Ordering::Relaxed);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
