//! Rolling-window rate limiter shared by all workers.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Caps outbound calls to `max_calls` per trailing `window`.
///
/// The history of recent call times lives under one mutex. When the
/// window is full, `wait` sleeps until the oldest entry expires while
/// still holding the lock: a waiter that slept must re-validate against
/// a full window before recording its own slot, and serializing sleepers
/// keeps that trivially true.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    history: Mutex<Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Calls-per-second limiter (the default one-second trailing window).
    pub fn per_second(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(1))
    }

    /// Block until one more call fits in the window, then record it.
    /// Never fails, only delays.
    pub fn wait(&self) {
        let mut history = self.history.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        history.retain(|t| now.duration_since(*t) < self.window);
        if history.len() >= self.max_calls {
            // entries are appended in time order, so the head is oldest
            let oldest = history[0];
            let elapsed = now.duration_since(oldest);
            if elapsed < self.window {
                std::thread::sleep(self.window - elapsed);
            }
            let now = Instant::now();
            history.retain(|t| now.duration_since(*t) < self.window);
        }
        history.push(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_does_not_delay() {
        let limiter = RateLimiter::new(3, Duration::from_millis(200));
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        limiter.wait();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn full_window_delays_until_oldest_expires() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        limiter.wait(); // third call must wait out the window
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn trailing_window_never_exceeded() {
        let window = Duration::from_millis(100);
        let limiter = RateLimiter::new(2, window);
        let mut stamps = Vec::new();
        for _ in 0..6 {
            limiter.wait();
            stamps.push(Instant::now());
        }
        for (i, t) in stamps.iter().enumerate() {
            let in_window = stamps[..=i]
                .iter()
                .filter(|s| t.duration_since(**s) < window)
                .count();
            assert!(in_window <= 2, "window held {in_window} calls");
        }
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        let limiter = RateLimiter::per_second(0);
        limiter.wait(); // must not deadlock
    }
}
