//! Shared FIFO backlog
//!
//! One mutex guards the queue; admission, insertion, and dequeue all pass
//! through it, so a bounded backlog can never be observed over its cap.
//! Producers blocked on admission park on the dequeue notification, which
//! fires whenever an element enters or leaves the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::parking::AutoResetEvent;
use crate::task::Task;

pub(crate) struct Backlog {
    queue: Mutex<VecDeque<Arc<Task>>>,
    dequeued: AutoResetEvent,
}

impl Backlog {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            dequeued: AutoResetEvent::new(),
        }
    }

    /// Append at the tail if the queue holds fewer than `cap` items
    /// (`cap == 0` means unbounded). The length check and the append happen
    /// under the same lock.
    pub fn try_push(&self, task: &Arc<Task>, cap: usize) -> bool {
        {
            let mut queue = self.queue.lock();
            if cap != 0 && queue.len() >= cap {
                return false;
            }
            queue.push_back(Arc::clone(task));
        }
        self.dequeued.set();
        true
    }

    /// Pop the oldest non-terminal item.
    ///
    /// Items aborted while still queued are dropped on the floor: they do
    /// not count as work and their hook already fired at abort time. Every
    /// removed element frees bounded space, so the dequeue notification
    /// fires per removal, not per returned item.
    pub fn try_pop(&self) -> Option<Arc<Task>> {
        loop {
            let popped = self.queue.lock().pop_front();
            match popped {
                None => return None,
                Some(task) => {
                    self.dequeued.set();
                    if !task.is_complete() {
                        return Some(task);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Park until an element is removed (or deposited) or the timeout
    /// elapses. Used by producers spinning on admission.
    pub fn wait_dequeue(&self, timeout: Duration) -> bool {
        self.dequeued.wait_timeout(timeout)
    }
}
