//! Park/wake primitive
//!
//! Auto-reset event in the manner of a counted futex word: `set` deposits a
//! single wake permit and wakes one waiter, `wait_timeout` consumes a
//! pending permit (fast path) or blocks until one arrives. A permit
//! deposited while nobody waits is not lost; the next wait returns
//! immediately.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub(crate) struct AutoResetEvent {
    permit: Mutex<bool>,
    cond: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self {
            permit: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Deposit one wake permit. At most one permit is held at a time;
    /// signalling an already-signalled event is a no-op.
    pub fn set(&self) {
        let mut permit = self.permit.lock();
        if !*permit {
            *permit = true;
            self.cond.notify_one();
        }
    }

    /// Block until a permit is available or the timeout elapses, consuming
    /// the permit. Returns `true` if woken by a permit.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permit = self.permit.lock();
        loop {
            if *permit {
                *permit = false;
                return true;
            }
            if self.cond.wait_until(&mut permit, deadline).timed_out() {
                let woken = *permit;
                *permit = false;
                return woken;
            }
        }
    }
}
