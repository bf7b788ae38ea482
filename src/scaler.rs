//! Elastic pool sizing
//!
//! A dedicated thread observes the pool on a periodic tick and resizes it
//! within `[initial_workers, max_workers]`:
//!
//! - **Grow** when overloaded (no idle worker and the backlog is at least
//!   as deep as the worker set) for longer than the current threshold.
//!   Each growth doubles the threshold (by `grow_overload_factor`) up to
//!   `grow_overload_max`, so a persistently saturated pool adds workers
//!   quickly at first and then ever more reluctantly. Any non-overloaded
//!   tick resets the threshold.
//! - **Shrink** when underloaded (an idle worker and an empty backlog)
//!   continuously for `shrink_idle`, retiring the last-added idle worker.
//!
//! Growth takes precedence: shrink is never considered on a tick that
//! observed overload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::debug;

use crate::error::PoolError;
use crate::pool::PoolInner;

/// Counters reported by the sizing thread when it exits.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScaleStats {
    pub ticks: u64,
    pub grows: u64,
    pub shrinks: u64,
}

/// Handle to the running sizing thread.
pub(crate) struct Scaler {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<ScaleStats>>,
}

impl Scaler {
    /// Request shutdown and wait for the sizing thread to exit.
    pub fn shutdown(mut self) -> ScaleStats {
        self.shutdown.store(true, Ordering::Release);
        self.handle
            .take()
            .expect("handle already taken")
            .join()
            .expect("sizing thread panicked")
    }
}

impl Drop for Scaler {
    fn drop(&mut self) {
        // Dropping without shutdown() detaches the thread; it exits on
        // the next tick.
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Spawn the sizing thread for `pool`.
pub(crate) fn spawn(pool: Arc<PoolInner>) -> Result<Scaler, PoolError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::Builder::new()
        .name("crew-scaler".into())
        .spawn(move || scale_loop(pool, flag))
        .map_err(PoolError::WorkerSpawn)?;
    Ok(Scaler {
        shutdown,
        handle: Some(handle),
    })
}

fn scale_loop(pool: Arc<PoolInner>, shutdown: Arc<AtomicBool>) -> ScaleStats {
    let config = pool.config().clone();
    let mut stats = ScaleStats::default();
    let mut threshold = config.grow_overload_min;
    let mut overload_since: Option<Instant> = None;
    let mut idle_since: Option<Instant> = None;

    loop {
        thread::sleep(config.scale_tick);
        if shutdown.load(Ordering::Acquire) || !pool.keep_running() {
            break;
        }
        stats.ticks += 1;

        let (workers, any_idle, backlog) = pool.load_snapshot();
        let now = Instant::now();

        let overloaded = workers < config.max_workers && !any_idle && backlog >= workers;
        if overloaded {
            idle_since = None;
            match overload_since {
                None => overload_since = Some(now),
                Some(since) if now.duration_since(since) > threshold => {
                    if pool.grow_one() {
                        stats.grows += 1;
                        debug!(
                            workers = workers + 1,
                            threshold_ms = threshold.as_millis() as u64,
                            "grew pool"
                        );
                    }
                    overload_since = None;
                    threshold = (threshold * config.grow_overload_factor)
                        .min(config.grow_overload_max);
                }
                Some(_) => {}
            }
            continue;
        }

        overload_since = None;
        threshold = config.grow_overload_min;

        let underloaded = workers > config.initial_workers && any_idle && backlog == 0;
        if underloaded {
            match idle_since {
                None => idle_since = Some(now),
                Some(since) if now.duration_since(since) > config.shrink_idle => {
                    if pool.shrink_one() {
                        stats.shrinks += 1;
                        debug!(workers = workers - 1, "shrank pool");
                    }
                    idle_since = None;
                }
                Some(_) => {}
            }
        } else {
            idle_since = None;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use crate::config::PoolConfig;
    use crate::pool::ThreadPool;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_for_worker_count(
        pool: &ThreadPool,
        predicate: impl Fn(usize) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate(pool.worker_count()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_grows_under_load_and_shrinks_when_idle() {
        let pool = ThreadPool::new(
            PoolConfig::new()
                .initial_workers(2)
                .max_workers(6)
                .scale_tick(Duration::from_millis(10))
                .grow_overload_min(Duration::from_millis(20))
                .grow_overload_max(Duration::from_millis(80))
                .shrink_idle(Duration::from_millis(60)),
        )
        .unwrap();

        let gate = Arc::new(AtomicBool::new(false));
        let tasks: Vec<_> = (0..24)
            .map(|_| {
                let gate = Arc::clone(&gate);
                pool.enqueue(move || {
                    while !gate.load(Ordering::Acquire) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Ok(())
                })
                .unwrap()
            })
            .collect();

        // Sustained overload: every worker pinned, backlog deep.
        assert!(
            wait_for_worker_count(&pool, |n| n == 6, Duration::from_secs(5)),
            "pool should grow to max_workers under sustained overload"
        );
        // The ceiling holds while the load persists.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.worker_count(), 6);

        gate.store(true, Ordering::Release);
        for task in &tasks {
            task.wait().unwrap();
        }

        // Sustained idleness: back down to the initial size, never below.
        assert!(
            wait_for_worker_count(&pool, |n| n == 2, Duration::from_secs(5)),
            "pool should shrink back to initial_workers when idle"
        );
        std::thread::sleep(Duration::from_millis(100));
        assert!(pool.worker_count() >= 2);
        pool.stop();
    }

    #[test]
    fn test_no_growth_without_backlog_pressure() {
        let pool = ThreadPool::new(
            PoolConfig::new()
                .initial_workers(2)
                .max_workers(8)
                .scale_tick(Duration::from_millis(10))
                .grow_overload_min(Duration::from_millis(20)),
        )
        .unwrap();

        // Light, sequential load: an idle worker is always available.
        for _ in 0..20 {
            pool.enqueue(|| Ok(())).unwrap().wait().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(pool.worker_count(), 2);
        pool.stop();
    }
}
