//! Bounded in-flight request gate.
//!
//! Capacity models how many requests the remote service tolerates at
//! once, independent of local worker count. `Mutex + Condvar` from std,
//! with a bounded acquire so queued callers can re-check cancellation.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct ConcurrencyGate {
    capacity: usize,
    free: Mutex<usize>,
    cond: Condvar,
}

/// RAII slot; returns the slot on drop.
pub struct GateGuard<'a>(&'a ConcurrencyGate);

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            free: Mutex::new(capacity),
            cond: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a slot, waiting at most `timeout`. Returns `None` on timeout.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<GateGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut free = self.free.lock().expect("gate lock poisoned");
        while *free == 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            let (guard, result) = self
                .cond
                .wait_timeout(free, left)
                .expect("gate lock poisoned");
            free = guard;
            if result.timed_out() && *free == 0 {
                return None;
            }
        }
        *free -= 1;
        Some(GateGuard(self))
    }

    /// Return a slot. Releasing with every slot already free is ignored
    /// with a warning: multiple failure paths may attempt cleanup.
    fn release(&self) {
        let mut free = self.free.lock().expect("gate lock poisoned");
        if *free == self.capacity {
            log::warn!(
                "concurrency gate released with all {} slots free",
                self.capacity
            );
            return;
        }
        *free += 1;
        self.cond.notify_one();
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}
