//! Typed child pools
//!
//! A [`ChildPool`] groups a batch of tasks enqueued into the same
//! [`ThreadPool`](crate::pool::ThreadPool): it tracks their handles,
//! enforces its own backlog bound on top of the global one, accumulates
//! wall/CPU totals as members complete, and offers batch waits and
//! aborts. The parameter type `T` survives the facade, so typed payloads
//! reach the callable without downcasts.
//!
//! A child pool is owned by one producer at a time (`&mut self` on every
//! mutating operation); the tasks themselves still execute and complete
//! concurrently on the pool's workers.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PoolError, TaskResult};
use crate::pool::PoolInner;
use crate::task::{Task, TaskOptions, TaskState};

/// Typed, bounded facade over a [`ThreadPool`](crate::pool::ThreadPool).
///
/// Created by [`ThreadPool::child_pool`](crate::pool::ThreadPool::child_pool).
pub struct ChildPool<T> {
    inner: Arc<PoolInner>,
    max_depth: usize,
    tracked: Vec<Arc<Task>>,
    wall_total: Duration,
    cpu_total: Duration,
    _param: PhantomData<fn(T)>,
}

impl<T: Send + 'static> ChildPool<T> {
    pub(crate) fn new(inner: Arc<PoolInner>, max_depth: usize) -> Self {
        Self {
            inner,
            max_depth,
            tracked: Vec::new(),
            wall_total: Duration::ZERO,
            cpu_total: Duration::ZERO,
            _param: PhantomData,
        }
    }

    /// Enqueue a callable taking no parameter.
    pub fn enqueue<F>(&mut self, f: F) -> Result<Arc<Task>, PoolError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.enqueue_opts(f, TaskOptions::new())
    }

    /// Enqueue a callable with a name and/or completion hook.
    pub fn enqueue_opts<F>(&mut self, f: F, opts: TaskOptions) -> Result<Arc<Task>, PoolError>
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
        self.submit(task)
    }

    /// Enqueue a callable applied to a typed value.
    pub fn enqueue_with<F>(&mut self, value: T, f: F) -> Result<Arc<Task>, PoolError>
    where
        F: FnOnce(T) -> TaskResult + Send + 'static,
    {
        self.enqueue_with_opts(value, f, TaskOptions::new())
    }

    /// Typed enqueue with a name and/or completion hook.
    pub fn enqueue_with_opts<F>(
        &mut self,
        value: T,
        f: F,
        opts: TaskOptions,
    ) -> Result<Arc<Task>, PoolError>
    where
        F: FnOnce(T) -> TaskResult + Send + 'static,
    {
        self.enqueue_opts(move || f(value), opts)
    }

    /// Admit against the tighter of the child and global bounds, insert,
    /// track, purge.
    fn submit(&mut self, task: Arc<Task>) -> Result<Arc<Task>, PoolError> {
        {
            let depth = self.max_depth;
            let tracked = &self.tracked;
            let gate = move || {
                depth == 0
                    || tracked
                        .iter()
                        .filter(|t| t.state() == TaskState::Pending)
                        .count()
                        < depth
            };
            let gate: &dyn Fn() -> bool = &gate;
            self.inner.submit(&task, Some(gate))?;
        }
        self.tracked.push(Arc::clone(&task));
        self.purge();
        Ok(task)
    }

    /// Number of tracked (incomplete or failed-and-uninspected) tasks.
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Check if any tracked task failed.
    pub fn any_failed(&self) -> bool {
        self.tracked.iter().any(|t| t.had_error())
    }

    /// Snapshot of the tracked tasks that failed.
    pub fn failed_items(&self) -> Vec<Arc<Task>> {
        self.tracked
            .iter()
            .filter(|t| t.had_error())
            .cloned()
            .collect()
    }

    /// Attempt to abort every tracked task. Returns `true` iff every
    /// attempt succeeded, i.e. none of them had already started (or
    /// finished).
    pub fn abort_all(&mut self) -> bool {
        let mut all = true;
        for task in &self.tracked {
            all &= task.abort();
        }
        all
    }

    /// Wait for every tracked task to reach a terminal state.
    ///
    /// Failed tasks do not fail the wait; inspect them afterwards with
    /// [`any_failed`](Self::any_failed) or raise them with
    /// [`throw_aggregate`](Self::throw_aggregate).
    pub fn wait_all(&mut self) -> Result<(), PoolError> {
        self.purge();
        for task in self.tracked.clone() {
            task.wait()?;
        }
        self.purge();
        Ok(())
    }

    /// Wait up to `timeout` for every tracked task. Returns `Ok(false)`
    /// on timeout; the remaining tasks keep running.
    pub fn wait_all_for(&mut self, timeout: Duration) -> Result<bool, PoolError> {
        self.purge();
        let deadline = Instant::now() + timeout;
        for task in self.tracked.clone() {
            let now = Instant::now();
            if now >= deadline || !task.wait_for(deadline - now)? {
                self.purge();
                return Ok(false);
            }
        }
        self.purge();
        Ok(true)
    }

    /// Like [`wait_all`](Self::wait_all), but every `interval` without
    /// overall completion `progress` is invoked; a `false` return ends
    /// the wait with `Ok(false)` without aborting anything.
    pub fn wait_all_with_progress<F>(
        &mut self,
        interval: Duration,
        mut progress: F,
    ) -> Result<bool, PoolError>
    where
        F: FnMut() -> bool,
    {
        self.purge();
        let mut next_report = Instant::now() + interval;
        for task in self.tracked.clone() {
            loop {
                let now = Instant::now();
                if now >= next_report {
                    if !progress() {
                        self.purge();
                        return Ok(false);
                    }
                    next_report += interval;
                    continue;
                }
                if task.wait_for(next_report - now)? {
                    break;
                }
            }
        }
        self.purge();
        Ok(true)
    }

    /// Raise an aggregate error if any tracked task failed.
    ///
    /// The bundled failures count as inspected: they leave the tracked
    /// set and their durations join the totals.
    pub fn throw_aggregate(&mut self) -> Result<(), PoolError> {
        let mut errors = Vec::new();
        let mut kept = Vec::with_capacity(self.tracked.len());
        for task in std::mem::take(&mut self.tracked) {
            if task.had_error() {
                if let Some(e) = task.error() {
                    errors.push(e);
                }
                self.absorb_durations(&task);
            } else {
                kept.push(task);
            }
        }
        self.tracked = kept;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Aggregate(errors))
        }
    }

    /// Total wall-clock time of completed-and-purged tasks.
    pub fn wall_total(&self) -> Duration {
        self.wall_total
    }

    /// Total CPU time of completed-and-purged tasks, where measured.
    pub fn cpu_total(&self) -> Duration {
        self.cpu_total
    }

    /// Move completed tasks out of the tracked set, folding their
    /// durations into the totals. Failed tasks stay until inspected.
    fn purge(&mut self) {
        let mut kept = Vec::with_capacity(self.tracked.len());
        for task in std::mem::take(&mut self.tracked) {
            if task.is_complete() && !task.had_error() {
                self.absorb_durations(&task);
            } else {
                kept.push(task);
            }
        }
        self.tracked = kept;
    }

    fn absorb_durations(&mut self, task: &Task) {
        self.wall_total += task.wall_duration();
        if let Some(cpu) = task.cpu_duration() {
            self.cpu_total += cpu;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::ThreadPool;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn pool(workers: usize) -> ThreadPool {
        ThreadPool::new(
            PoolConfig::new()
                .initial_workers(workers)
                .max_workers(workers),
        )
        .unwrap()
    }

    fn spin_until(gate: &AtomicBool) {
        while !gate.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_typed_parameters_reach_the_callable() {
        let pool = pool(2);
        let mut child = pool.child_pool::<u64>(0);
        let sum = Arc::new(AtomicUsize::new(0));

        for v in [1u64, 2, 3, 4] {
            let sum = Arc::clone(&sum);
            child
                .enqueue_with(v, move |v| {
                    sum.fetch_add(v as usize, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        child.wait_all().unwrap();

        assert_eq!(sum.load(Ordering::SeqCst), 10);
        assert!(child.is_empty());
        pool.stop();
    }

    #[test]
    fn test_aggregate_failures() {
        let pool = pool(2);
        let mut child = pool.child_pool::<()>(0);

        for i in 0..5u32 {
            child
                .enqueue(move || {
                    if i == 1 || i == 3 {
                        Err(format!("failure {i}").into())
                    } else {
                        Ok(())
                    }
                })
                .unwrap();
        }
        child.wait_all().unwrap();

        assert!(child.any_failed());
        assert_eq!(child.failed_items().len(), 2);

        let err = child.throw_aggregate().unwrap_err();
        match err {
            PoolError::Aggregate(failures) => {
                assert_eq!(failures.len(), 2);
                let text: Vec<_> = failures.iter().map(|f| f.to_string()).collect();
                assert!(text.iter().any(|t| t.contains("failure 1")));
                assert!(text.iter().any(|t| t.contains("failure 3")));
            }
            other => panic!("expected aggregate error, got {other:?}"),
        }

        // The failures were inspected and purged.
        assert!(!child.any_failed());
        assert!(child.is_empty());
        assert!(child.throw_aggregate().is_ok());
        pool.stop();
    }

    #[test]
    fn test_totals_accumulate_on_purge() {
        let pool = pool(2);
        let mut child = pool.child_pool::<()>(0);

        for _ in 0..3 {
            child
                .enqueue(|| {
                    std::thread::sleep(Duration::from_millis(10));
                    Ok(())
                })
                .unwrap();
        }
        child.wait_all().unwrap();

        assert!(child.is_empty());
        assert!(child.wall_total() >= Duration::from_millis(25));
        pool.stop();
    }

    #[test]
    fn test_abort_all() {
        let pool = pool(1);
        let gate = Arc::new(AtomicBool::new(false));
        let mut child = pool.child_pool::<()>(0);

        let ran = Arc::new(AtomicUsize::new(0));
        let blocker = {
            let gate = Arc::clone(&gate);
            child
                .enqueue(move || {
                    spin_until(&gate);
                    Ok(())
                })
                .unwrap()
        };
        while blocker.start_at().is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            child
                .enqueue(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        // The blocker already started, so not every abort can succeed.
        assert!(!child.abort_all());
        gate.store(true, Ordering::Release);
        child.wait_all().unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!child.any_failed());
        pool.stop();
    }

    #[test]
    fn test_abort_all_succeeds_when_nothing_started() {
        let pool = pool(1);
        let gate = Arc::new(AtomicBool::new(false));

        // Hold the only worker busy outside the child.
        let blocker = {
            let gate = Arc::clone(&gate);
            pool.enqueue(move || {
                spin_until(&gate);
                Ok(())
            })
            .unwrap()
        };
        while blocker.start_at().is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut child = pool.child_pool::<()>(0);
        for _ in 0..3 {
            child.enqueue(|| Ok(())).unwrap();
        }

        assert!(child.abort_all());
        assert!(child.tracked.iter().all(|t| t.was_aborted()));
        gate.store(true, Ordering::Release);
        pool.stop();
    }

    #[test]
    fn test_child_depth_bound_blocks_enqueue() {
        let pool = Arc::new(
            ThreadPool::new(
                PoolConfig::new()
                    .initial_workers(1)
                    .max_workers(1)
                    .spin_count(10),
            )
            .unwrap(),
        );
        let gate = Arc::new(AtomicBool::new(false));

        // Pin the worker so child items stay pending.
        let blocker = {
            let gate = Arc::clone(&gate);
            pool.enqueue(move || {
                spin_until(&gate);
                Ok(())
            })
            .unwrap()
        };
        while blocker.start_at().is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }

        let (tx, rx) = mpsc::channel();
        let producer = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let mut child = pool.child_pool::<()>(1);
                child.enqueue(|| Ok(())).unwrap();
                tx.send("first admitted").unwrap();
                // Private bound is 1: this blocks until the first child
                // item leaves the backlog.
                child.enqueue(|| Ok(())).unwrap();
                tx.send("second admitted").unwrap();
                child.wait_all()
            })
        };

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        gate.store(true, Ordering::Release);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        producer.join().unwrap().unwrap();
        pool.stop();
    }

    #[test]
    fn test_wait_all_for_times_out() {
        let pool = pool(1);
        let mut child = pool.child_pool::<()>(0);
        child
            .enqueue(|| {
                std::thread::sleep(Duration::from_millis(150));
                Ok(())
            })
            .unwrap();

        assert!(!child.wait_all_for(Duration::from_millis(20)).unwrap());
        // Timing out aborts nothing.
        assert!(child.wait_all().is_ok());
        assert!(!child.any_failed());
        pool.stop();
    }

    #[test]
    fn test_wait_all_with_progress_can_give_up() {
        let pool = pool(1);
        let mut child = pool.child_pool::<()>(0);
        let gate = Arc::new(AtomicBool::new(false));
        {
            let gate = Arc::clone(&gate);
            child
                .enqueue(move || {
                    spin_until(&gate);
                    Ok(())
                })
                .unwrap();
        }

        let calls = AtomicUsize::new(0);
        let finished = child
            .wait_all_with_progress(Duration::from_millis(10), || {
                calls.fetch_add(1, Ordering::SeqCst) < 2
            })
            .unwrap();

        assert!(!finished);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        gate.store(true, Ordering::Release);
        child.wait_all().unwrap();
        pool.stop();
    }
}
