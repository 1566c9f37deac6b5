use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Identity-agnostic fixed-window rate limiter.
///
/// A single budget covers all callers; exceeding it rejects the
/// request outright, with no queueing or backpressure. The counter
/// resets when the window elapses.
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

struct WindowState {
    window_start: Instant,
    count: u32,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Returns true if the request fits in the current window's budget.
    pub fn check(&self) -> bool {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }

        if state.count >= self.max_requests {
            return false;
        }

        state.count += 1;
        true
    }
}
