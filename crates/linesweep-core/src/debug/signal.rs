//! Latch that turns an asynchronous "stopped" callback into a blocking wait.
//!
//! Backends that receive stop events on their own thread call
//! [`StopSignal::notify`]; the validation loop calls [`StopSignal::wait`]
//! after each resume. A stop delivered before the wait begins is kept, so
//! a fast breakpoint hit is never lost.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::debug::StopReason;

#[derive(Default)]
pub struct StopSignal {
    pending: Mutex<Option<StopReason>>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, reason: StopReason) {
        let mut pending = self.pending.lock();
        *pending = Some(reason);
        self.cond.notify_all();
    }

    /// Drop any undelivered stop. Call before issuing a resume.
    pub fn reset(&self) {
        self.pending.lock().take();
    }

    pub fn is_set(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Take the next stop, waiting at most `timeout`.
    pub fn wait(&self, timeout: Duration) -> Option<StopReason> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while pending.is_none() {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        pending.take()
    }
}
