//! Rate limiting for anonymous feedback.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_PER_WINDOW: u32 = 30;
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Decides whether one more feedback event for `key` may be recorded.
pub trait FeedbackGate: Send + Sync {
    fn allow(&self, key: &str) -> bool;
}

/// Key for one viewer reacting to one idea.
pub fn feedback_key(idea_id: i64, origin: &str) -> String {
    format!("{}:{}", idea_id, origin)
}

/// Fixed-window counter per key. Expired windows are pruned on access.
pub struct FixedWindowLimiter {
    max_per_window: u32,
    window: Duration,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl FixedWindowLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.retain(|_, (started, _)| now.duration_since(*started) < self.window);
        let (_, count) = windows.entry(key.to_string()).or_insert((now, 0));
        if *count >= self.max_per_window {
            return false;
        }
        *count += 1;
        true
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_WINDOW, Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

impl FeedbackGate for FixedWindowLimiter {
    fn allow(&self, key: &str) -> bool {
        let allowed = self.allow_at(key, Instant::now());
        if !allowed {
            tracing::debug!(key, "Feedback rate limited");
        }
        allowed
    }
}

/// Gate that lets everything through.
pub struct Unlimited;

impl FeedbackGate for Unlimited {
    fn allow(&self, _key: &str) -> bool {
        true
    }
}
