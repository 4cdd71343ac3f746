//! Delayed retry lanes.
//!
//! Each lane is a FIFO of due-stamped tasks drained by one dedicated
//! worker. New tasks go to the least-loaded lane; waking, delaying until
//! due, and re-attempting are driven by the orchestrator's lane workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One delayed re-attempt. Owned by exactly one lane queue until popped.
pub struct RetryTask<T> {
    pub item: T,
    /// Attempt number the re-attempt will run as (>= 2).
    pub attempt: u32,
    pub due: Instant,
}

struct Lane<T> {
    queue: Mutex<VecDeque<RetryTask<T>>>,
    cond: Condvar,
}

pub struct RetryLanes<T> {
    lanes: Vec<Lane<T>>,
    stopped: AtomicBool,
}

impl<T> RetryLanes<T> {
    pub fn new(count: usize) -> Self {
        let lanes = (0..count.max(1))
            .map(|_| Lane {
                queue: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
            })
            .collect();
        Self {
            lanes,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Queue a task on the lane with the fewest pending tasks (ties go to
    /// the lowest index). Returns the chosen lane.
    pub fn schedule(&self, task: RetryTask<T>) -> usize {
        let idx = self
            .lanes
            .iter()
            .enumerate()
            .min_by_key(|(_, lane)| lane.queue.lock().expect("retry lane lock poisoned").len())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let lane = &self.lanes[idx];
        lane.queue
            .lock()
            .expect("retry lane lock poisoned")
            .push_back(task);
        lane.cond.notify_one();
        idx
    }

    /// Pop the lane's next task in FIFO order, waiting at most `poll`.
    /// The short poll keeps the lane worker responsive to stop and
    /// cancellation flags.
    pub fn pop(&self, lane: usize, poll: Duration) -> Option<RetryTask<T>> {
        let lane = &self.lanes[lane];
        let mut queue = lane.queue.lock().expect("retry lane lock poisoned");
        if queue.is_empty() {
            let (guard, _) = lane
                .cond
                .wait_timeout(queue, poll)
                .expect("retry lane lock poisoned");
            queue = guard;
        }
        queue.pop_front()
    }

    /// Tasks still queued across all lanes.
    pub fn queued(&self) -> usize {
        self.lanes
            .iter()
            .map(|l| l.queue.lock().expect("retry lane lock poisoned").len())
            .sum()
    }

    /// Signal lane workers to exit once their queue is drained.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        for lane in &self.lanes {
            lane.cond.notify_all();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}
