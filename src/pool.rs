//! The thread pool
//!
//! Owns the backlog and the worker slot set, admits new work against the
//! configured bound, and orchestrates shutdown. The slot set lives behind
//! its own lock so the sizing controller never contends with enqueue for
//! the backlog mutex.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::backlog::Backlog;
use crate::child::ChildPool;
use crate::config::PoolConfig;
use crate::error::{PoolError, TaskResult};
use crate::scaler::{self, Scaler};
use crate::task::{Task, TaskId, TaskOptions};
use crate::worker::{self, WorkerInfo, WorkerSlot};

/// State shared between the pool and every task handle it hands out:
/// the stop flag plus the spin/park parameters the wait loops use.
pub(crate) struct PoolShared {
    stopping: AtomicBool,
    pub(crate) spin_count: u32,
    pub(crate) park_wait: Duration,
}

impl PoolShared {
    pub(crate) fn new(spin_count: u32, park_wait: Duration) -> Self {
        Self {
            stopping: AtomicBool::new(false),
            spin_count,
            park_wait,
        }
    }

    #[inline]
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }
}

pub(crate) struct PoolInner {
    shared: Arc<PoolShared>,
    config: PoolConfig,
    backlog: Backlog,
    slots: RwLock<Vec<Arc<WorkerSlot>>>,
    /// Join handles of slots removed by shrink, reaped at stop.
    retired: Mutex<Vec<thread::JoinHandle<()>>>,
    next_slot_id: AtomicUsize,
    next_task_id: AtomicU64,
}

impl PoolInner {
    #[inline]
    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    #[inline]
    pub(crate) fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    #[inline]
    pub(crate) fn keep_running(&self) -> bool {
        !self.shared.is_stopping()
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Admit and insert one task, then signal an idle worker.
    ///
    /// Blocks (spin-then-park on the dequeue notification) while the
    /// global bound, or the caller's `gate` when present, refuses the
    /// item. Fails with `ShuttingDown` if the pool stops first.
    pub(crate) fn submit(
        &self,
        task: &Arc<Task>,
        gate: Option<&dyn Fn() -> bool>,
    ) -> Result<(), PoolError> {
        let cap = self.config.max_backlog;
        let mut spins = 0u32;
        loop {
            if !self.keep_running() {
                return Err(PoolError::ShuttingDown);
            }
            let admitted = gate.map_or(true, |g| g()) && self.backlog.try_push(task, cap);
            if admitted {
                self.wake_one_idle();
                return Ok(());
            }
            if spins < self.shared.spin_count {
                spins += 1;
                std::hint::spin_loop();
            } else {
                self.backlog.wait_dequeue(self.shared.park_wait);
                spins = 0;
            }
        }
    }

    /// Signal one idle worker. Finding none is fine: the new tail will be
    /// observed by whichever worker frees up next.
    fn wake_one_idle(&self) {
        for slot in self.slots.read().iter() {
            if slot.is_idle() && slot.keep_running() {
                slot.unpark();
                return;
            }
        }
    }

    pub(crate) fn spawn_slot(self: &Arc<Self>) -> Result<(), PoolError> {
        let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
        let slot = WorkerSlot::new(id);
        let pool = Arc::clone(self);
        let worker_slot = Arc::clone(&slot);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, id))
            .spawn(move || worker::run(pool, worker_slot))
            .map_err(PoolError::WorkerSpawn)?;
        slot.attach(handle);
        self.slots.write().push(slot);
        Ok(())
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Snapshot for the sizing controller: (worker count, any slot idle,
    /// backlog length).
    pub(crate) fn load_snapshot(&self) -> (usize, bool, usize) {
        let slots = self.slots.read();
        let workers = slots.len();
        let any_idle = slots.iter().any(|s| s.is_idle());
        drop(slots);
        (workers, any_idle, self.backlog.len())
    }

    /// Add one worker, respecting `max_workers`. Only the sizing
    /// controller calls this.
    pub(crate) fn grow_one(self: &Arc<Self>) -> bool {
        if !self.keep_running() || self.worker_count() >= self.config.max_workers {
            return false;
        }
        match self.spawn_slot() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to grow pool");
                false
            }
        }
    }

    /// Retire the last-added idle worker, respecting `initial_workers`.
    /// Only the sizing controller calls this.
    pub(crate) fn shrink_one(&self) -> bool {
        let mut slots = self.slots.write();
        if slots.len() <= self.config.initial_workers {
            return false;
        }
        let Some(pos) = slots.iter().rposition(|s| s.is_idle()) else {
            return false;
        };
        let slot = slots.remove(pos);
        drop(slots);

        slot.retire();
        slot.unpark();
        if let Some(handle) = slot.take_handle() {
            self.retired.lock().push(handle);
        }
        true
    }

    /// Flag every slot down, join all worker threads, clear the slot set.
    pub(crate) fn stop_workers(&self) {
        self.shared.stop();
        let slots: Vec<_> = std::mem::take(&mut *self.slots.write());
        for slot in &slots {
            slot.unpark();
        }
        for slot in &slots {
            if let Some(handle) = slot.take_handle() {
                let _ = handle.join();
            }
        }
        for handle in self.retired.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

/// A process-resident pool of pre-spawned worker threads.
///
/// Workers drain one shared FIFO backlog. Enqueue operations return an
/// [`Arc<Task>`] handle, the sole mechanism to observe per-item
/// completion. See the crate docs for an overview.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    scaler: Mutex<Option<Scaler>>,
}

impl ThreadPool {
    /// Validate `config`, pre-spawn `initial_workers` workers, and start
    /// the sizing controller.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let shared = Arc::new(PoolShared::new(config.spin_count, config.park_wait));
        let initial = config.initial_workers;
        let inner = Arc::new(PoolInner {
            shared,
            config,
            backlog: Backlog::new(),
            slots: RwLock::new(Vec::with_capacity(initial)),
            retired: Mutex::new(Vec::new()),
            next_slot_id: AtomicUsize::new(0),
            next_task_id: AtomicU64::new(0),
        });

        for _ in 0..initial {
            if let Err(e) = inner.spawn_slot() {
                inner.stop_workers();
                return Err(e);
            }
        }
        let scaler = match scaler::spawn(Arc::clone(&inner)) {
            Ok(s) => s,
            Err(e) => {
                inner.stop_workers();
                return Err(e);
            }
        };

        debug!(workers = initial, "pool started");
        Ok(Self {
            inner,
            scaler: Mutex::new(Some(scaler)),
        })
    }

    /// Pool with default configuration (environment overrides applied).
    pub fn with_defaults() -> Result<Self, PoolError> {
        Self::new(PoolConfig::default())
    }

    /// Enqueue a callable taking no parameter.
    pub fn enqueue<F>(&self, f: F) -> Result<Arc<Task>, PoolError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.enqueue_opts(f, TaskOptions::new())
    }

    /// Enqueue a callable with a name and/or completion hook.
    pub fn enqueue_opts<F>(&self, f: F, opts: TaskOptions) -> Result<Arc<Task>, PoolError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let task = Arc::new(Task::new(
            self.inner.next_task_id(),
            opts.name,
            Box::new(f),
            opts.on_complete,
            Arc::clone(self.inner.shared()),
        ));
        self.inner.submit(&task, None)?;
        Ok(task)
    }

    /// Enqueue a callable applied to `param`. The parameter is moved into
    /// the task and handed to the callable on the executing worker.
    pub fn enqueue_with<P, F>(&self, param: P, f: F) -> Result<Arc<Task>, PoolError>
    where
        P: Send + 'static,
        F: FnOnce(P) -> TaskResult + Send + 'static,
    {
        self.enqueue_with_opts(param, f, TaskOptions::new())
    }

    /// Parameterised enqueue with a name and/or completion hook.
    pub fn enqueue_with_opts<P, F>(
        &self,
        param: P,
        f: F,
        opts: TaskOptions,
    ) -> Result<Arc<Task>, PoolError>
    where
        P: Send + 'static,
        F: FnOnce(P) -> TaskResult + Send + 'static,
    {
        self.enqueue_opts(move || f(param), opts)
    }

    /// Abort a pending task. Equivalent to [`Task::abort`].
    pub fn abort(&self, task: &Task) -> bool {
        task.abort()
    }

    /// Create a typed facade over this pool with its own backlog bound
    /// (`max_depth == 0` means no private bound) and batch operations.
    pub fn child_pool<T: Send + 'static>(&self, max_depth: usize) -> ChildPool<T> {
        ChildPool::new(Arc::clone(&self.inner), max_depth)
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count()
    }

    /// Snapshot of every live worker.
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.inner.slots.read().iter().map(|s| s.info()).collect()
    }

    /// Items currently waiting on the backlog.
    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.len()
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.shared.is_stopping()
    }

    /// Stop the pool: flag shutdown, stop the sizing controller, wake and
    /// join every worker, clear the slot set. Running callables finish;
    /// items still queued are discarded and their waiters observe
    /// [`PoolError::ShuttingDown`]. Idempotent.
    pub fn stop(&self) {
        self.inner.shared.stop();
        if let Some(scaler) = self.scaler.lock().take() {
            let stats = scaler.shutdown();
            debug!(
                ticks = stats.ticks,
                grows = stats.grows,
                shrinks = stats.shrinks,
                "sizing controller stopped"
            );
        }
        self.inner.stop_workers();
        debug!("pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.inner.config.detached_workers {
            // Workers observe the flag and wind down on their own; the
            // sizing thread likewise.
            self.inner.shared.stop();
            drop(self.scaler.lock().take());
        } else {
            self.stop();
        }
    }
}
