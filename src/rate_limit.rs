use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client. State is per process and is lost on
/// restart.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            max_requests: config.max_requests,
            window: config.window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Counts one request for `key` at `now` and reports whether it is admitted.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Drop expired windows so idle clients do not accumulate.
        let window_len = self.window;
        windows.retain(|_, w| now.duration_since(w.started) < window_len);

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }
}
