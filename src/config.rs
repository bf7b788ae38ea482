//! Pool configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Builder methods (programmatic)
//! 2. Environment variables (`from_env`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust
//! use crew::PoolConfig;
//!
//! let config = PoolConfig::new()
//!     .initial_workers(4)
//!     .max_backlog(256)
//!     .spin_count(50);
//! assert!(config.validate().is_ok());
//! ```

use std::str::FromStr;
use std::time::Duration;

use crate::error::PoolError;

const DEFAULT_SPIN_COUNT: u32 = 100;
const DEFAULT_PARK_WAIT_MS: u64 = 1;
const DEFAULT_GROW_OVERLOAD_MIN_MS: u64 = 100;
const DEFAULT_GROW_OVERLOAD_MAX_MS: u64 = 6_400;
const DEFAULT_GROW_OVERLOAD_FACTOR: u32 = 2;
const DEFAULT_SHRINK_IDLE_MS: u64 = 30_000;
const DEFAULT_SCALE_TICK_MS: u64 = 100;
const DEFAULT_THREAD_NAME_PREFIX: &str = "crew-worker";

/// Scheduling priority applied to worker threads, best effort.
///
/// On platforms without the capability (or without the privilege) the
/// request is ignored; the pool behaves identically either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ThreadPriority {
    /// Background work, niced below the process default.
    Low = 0,
    /// Process default; nothing is changed on the thread.
    Normal = 1,
    /// Slightly favoured over the process default.
    AboveNormal = 2,
    /// Strongly favoured; latency-sensitive work.
    High = 3,
    /// Round-robin realtime class; usually requires privileges.
    Realtime = 4,
}

impl Default for ThreadPriority {
    fn default() -> Self {
        ThreadPriority::Normal
    }
}

impl FromStr for ThreadPriority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ThreadPriority::Low),
            "normal" => Ok(ThreadPriority::Normal),
            "abovenormal" | "above_normal" => Ok(ThreadPriority::AboveNormal),
            "high" => Ok(ThreadPriority::High),
            "realtime" => Ok(ThreadPriority::Realtime),
            _ => Err(()),
        }
    }
}

/// Pool configuration with builder pattern.
///
/// Frozen once handed to [`ThreadPool::new`](crate::pool::ThreadPool::new).
/// Use [`PoolConfig::new`] for explicit defaults or [`PoolConfig::from_env`]
/// to apply any `CREW_*` environment overrides.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers spawned at construction.
    pub initial_workers: usize,
    /// Upper bound the sizing controller may grow to. Must be >= initial.
    pub max_workers: usize,
    /// Scheduling priority for worker threads.
    pub worker_priority: ThreadPriority,
    /// If true, dropping the pool does not join workers; they wind down on
    /// their own once the stop flag is observed.
    pub detached_workers: bool,
    /// Backlog bound gating admission. 0 = unbounded.
    pub max_backlog: usize,
    /// Busy-checks before a blocked party parks.
    pub spin_count: u32,
    /// Upper bound of a single park, so stop flags are polled promptly.
    pub park_wait: Duration,
    /// Initial sustained-overload threshold before growing by one worker.
    pub grow_overload_min: Duration,
    /// Cap on the overload threshold as it backs off exponentially.
    pub grow_overload_max: Duration,
    /// Threshold multiplier applied after each growth.
    pub grow_overload_factor: u32,
    /// Sustained idleness before retiring one worker.
    pub shrink_idle: Duration,
    /// Period of the sizing controller tick.
    pub scale_tick: Duration,
    /// Worker threads are named `{prefix}-{id}`.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        let cpus = num_cpus::get();
        Self {
            initial_workers: cpus,
            max_workers: cpus * 4,
            worker_priority: ThreadPriority::default(),
            detached_workers: false,
            max_backlog: 0,
            spin_count: DEFAULT_SPIN_COUNT,
            park_wait: Duration::from_millis(DEFAULT_PARK_WAIT_MS),
            grow_overload_min: Duration::from_millis(DEFAULT_GROW_OVERLOAD_MIN_MS),
            grow_overload_max: Duration::from_millis(DEFAULT_GROW_OVERLOAD_MAX_MS),
            grow_overload_factor: DEFAULT_GROW_OVERLOAD_FACTOR,
            shrink_idle: Duration::from_millis(DEFAULT_SHRINK_IDLE_MS),
            scale_tick: Duration::from_millis(DEFAULT_SCALE_TICK_MS),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.into(),
        }
    }

    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `CREW_INITIAL_WORKERS` - workers spawned at construction
    /// - `CREW_MAX_WORKERS` - growth ceiling
    /// - `CREW_WORKER_PRIORITY` - low/normal/abovenormal/high/realtime
    /// - `CREW_DETACHED_WORKERS` - detach on drop (0/1)
    /// - `CREW_MAX_BACKLOG` - admission bound, 0 = unbounded
    /// - `CREW_SPIN_COUNT` - busy-checks before parking
    /// - `CREW_PARK_WAIT_MS` - single park upper bound
    /// - `CREW_GROW_OVERLOAD_MIN_MS` - initial growth threshold
    /// - `CREW_GROW_OVERLOAD_MAX_MS` - growth threshold cap
    /// - `CREW_GROW_OVERLOAD_FACTOR` - threshold multiplier
    /// - `CREW_SHRINK_IDLE_MS` - idleness before shrinking
    /// - `CREW_SCALE_TICK_MS` - sizing controller period
    /// - `CREW_THREAD_NAME_PREFIX` - worker thread name prefix
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            initial_workers: env_get("CREW_INITIAL_WORKERS", base.initial_workers),
            max_workers: env_get("CREW_MAX_WORKERS", base.max_workers),
            worker_priority: env_get("CREW_WORKER_PRIORITY", base.worker_priority),
            detached_workers: env_get_bool("CREW_DETACHED_WORKERS", base.detached_workers),
            max_backlog: env_get("CREW_MAX_BACKLOG", base.max_backlog),
            spin_count: env_get("CREW_SPIN_COUNT", base.spin_count),
            park_wait: Duration::from_millis(env_get("CREW_PARK_WAIT_MS", DEFAULT_PARK_WAIT_MS)),
            grow_overload_min: Duration::from_millis(env_get(
                "CREW_GROW_OVERLOAD_MIN_MS",
                DEFAULT_GROW_OVERLOAD_MIN_MS,
            )),
            grow_overload_max: Duration::from_millis(env_get(
                "CREW_GROW_OVERLOAD_MAX_MS",
                DEFAULT_GROW_OVERLOAD_MAX_MS,
            )),
            grow_overload_factor: env_get("CREW_GROW_OVERLOAD_FACTOR", base.grow_overload_factor),
            shrink_idle: Duration::from_millis(env_get(
                "CREW_SHRINK_IDLE_MS",
                DEFAULT_SHRINK_IDLE_MS,
            )),
            scale_tick: Duration::from_millis(env_get("CREW_SCALE_TICK_MS", DEFAULT_SCALE_TICK_MS)),
            thread_name_prefix: env_get("CREW_THREAD_NAME_PREFIX", base.thread_name_prefix),
        }
    }

    // Builder methods

    pub fn initial_workers(mut self, n: usize) -> Self {
        self.initial_workers = n;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn worker_priority(mut self, p: ThreadPriority) -> Self {
        self.worker_priority = p;
        self
    }

    pub fn detached_workers(mut self, detached: bool) -> Self {
        self.detached_workers = detached;
        self
    }

    pub fn max_backlog(mut self, bound: usize) -> Self {
        self.max_backlog = bound;
        self
    }

    pub fn spin_count(mut self, spins: u32) -> Self {
        self.spin_count = spins;
        self
    }

    pub fn park_wait(mut self, d: Duration) -> Self {
        self.park_wait = d;
        self
    }

    pub fn grow_overload_min(mut self, d: Duration) -> Self {
        self.grow_overload_min = d;
        self
    }

    pub fn grow_overload_max(mut self, d: Duration) -> Self {
        self.grow_overload_max = d;
        self
    }

    pub fn grow_overload_factor(mut self, factor: u32) -> Self {
        self.grow_overload_factor = factor;
        self
    }

    pub fn shrink_idle(mut self, d: Duration) -> Self {
        self.shrink_idle = d;
        self
    }

    pub fn scale_tick(mut self, d: Duration) -> Self {
        self.scale_tick = d;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate configuration and return an error if invalid.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.initial_workers == 0 {
            return Err(PoolError::ConfigInvalid("initial_workers must be > 0"));
        }
        if self.max_workers < self.initial_workers {
            return Err(PoolError::ConfigInvalid(
                "max_workers must be >= initial_workers",
            ));
        }
        if self.grow_overload_factor == 0 {
            return Err(PoolError::ConfigInvalid(
                "grow_overload_factor must be >= 1",
            ));
        }
        if self.grow_overload_max < self.grow_overload_min {
            return Err(PoolError::ConfigInvalid(
                "grow_overload_max must be >= grow_overload_min",
            ));
        }
        if self.park_wait.is_zero() {
            return Err(PoolError::ConfigInvalid("park_wait must be non-zero"));
        }
        if self.scale_tick.is_zero() {
            return Err(PoolError::ConfigInvalid("scale_tick must be non-zero"));
        }
        Ok(())
    }
}

/// Get environment variable parsed as type T, or return default.
fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::new();
        assert_eq!(config.initial_workers, num_cpus::get());
        assert_eq!(config.max_workers, num_cpus::get() * 4);
        assert_eq!(config.worker_priority, ThreadPriority::Normal);
        assert!(!config.detached_workers);
        assert_eq!(config.max_backlog, 0);
        assert_eq!(config.spin_count, 100);
        assert_eq!(config.park_wait, Duration::from_millis(1));
        assert_eq!(config.grow_overload_min, Duration::from_millis(100));
        assert_eq!(config.grow_overload_max, Duration::from_millis(6_400));
        assert_eq!(config.grow_overload_factor, 2);
        assert_eq!(config.shrink_idle, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new()
            .initial_workers(2)
            .max_workers(8)
            .max_backlog(64)
            .worker_priority(ThreadPriority::High)
            .spin_count(10)
            .thread_name_prefix("render");

        assert_eq!(config.initial_workers, 2);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_backlog, 64);
        assert_eq!(config.worker_priority, ThreadPriority::High);
        assert_eq!(config.thread_name_prefix, "render");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(PoolConfig::new().initial_workers(0).validate().is_err());

        let config = PoolConfig::new().initial_workers(8).max_workers(2);
        assert!(config.validate().is_err());

        assert!(PoolConfig::new().grow_overload_factor(0).validate().is_err());
        assert!(PoolConfig::new()
            .park_wait(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::new()
            .grow_overload_min(Duration::from_millis(500))
            .grow_overload_max(Duration::from_millis(100))
            .validate()
            .is_err());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("high".parse(), Ok(ThreadPriority::High));
        assert_eq!("ABOVENORMAL".parse(), Ok(ThreadPriority::AboveNormal));
        assert_eq!("above_normal".parse(), Ok(ThreadPriority::AboveNormal));
        assert!("garbage".parse::<ThreadPriority>().is_err());
    }

    #[test]
    fn test_from_env_unset_matches_defaults() {
        // No CREW_* variables set in the test environment.
        let config = PoolConfig::from_env();
        assert_eq!(config.spin_count, PoolConfig::new().spin_count);
        assert_eq!(config.park_wait, PoolConfig::new().park_wait);
    }
}
