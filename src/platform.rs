//! Platform capabilities
//!
//! Per-thread CPU clocks and worker thread priority. Both are optional:
//! on targets without the capability the probes return `None` (or do
//! nothing) and every behavioural guarantee of the pool holds without
//! them; only the diagnostics get poorer.

use std::time::Duration;

use crate::config::ThreadPriority;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// CPU clock of one specific thread, sampleable from any thread.
        ///
        /// Obtained by the owning thread at startup; holders may sample the
        /// accumulated CPU time of that thread for as long as it runs.
        #[derive(Debug, Clone, Copy)]
        pub struct ThreadCpuClock {
            clock: libc::clockid_t,
        }

        impl ThreadCpuClock {
            /// Clock of the calling thread.
            pub fn current() -> Option<Self> {
                let mut clock: libc::clockid_t = 0;
                let rc = unsafe { libc::pthread_getcpuclockid(libc::pthread_self(), &mut clock) };
                if rc == 0 {
                    Some(Self { clock })
                } else {
                    None
                }
            }

            /// Total CPU time consumed so far by the owning thread.
            pub fn sample(&self) -> Option<Duration> {
                let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
                let rc = unsafe { libc::clock_gettime(self.clock, &mut ts) };
                if rc == 0 {
                    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
                } else {
                    None
                }
            }
        }

        /// CPU time consumed so far by the calling thread.
        pub fn thread_cpu_time() -> Option<Duration> {
            let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
            if rc == 0 {
                Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
            } else {
                None
            }
        }

        /// Apply the configured priority to the calling thread, best effort.
        ///
        /// Realtime maps to `SCHED_RR`; the other levels map to nice values.
        /// Failures (typically missing privileges) are logged and ignored.
        pub(crate) fn apply_priority(priority: ThreadPriority) {
            if priority == ThreadPriority::Realtime {
                let param = libc::sched_param { sched_priority: 1 };
                let rc = unsafe {
                    libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param)
                };
                if rc != 0 {
                    tracing::debug!(rc, "realtime worker priority unavailable");
                }
                return;
            }

            let nice = match priority {
                ThreadPriority::Low => 10,
                ThreadPriority::Normal => return,
                ThreadPriority::AboveNormal => -5,
                ThreadPriority::High => -10,
                ThreadPriority::Realtime => unreachable!(),
            };
            let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
            if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) } != 0 {
                tracing::debug!(nice, "worker priority unavailable");
            }
        }
    } else {
        /// CPU clock of one specific thread. Unsupported on this target;
        /// never constructed.
        #[derive(Debug, Clone, Copy)]
        pub struct ThreadCpuClock {
            _private: (),
        }

        impl ThreadCpuClock {
            pub fn current() -> Option<Self> {
                None
            }

            pub fn sample(&self) -> Option<Duration> {
                None
            }
        }

        /// CPU time accounting is unavailable on this target.
        pub fn thread_cpu_time() -> Option<Duration> {
            None
        }

        pub(crate) fn apply_priority(priority: ThreadPriority) {
            let _ = priority;
        }
    }
}
