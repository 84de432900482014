//! Sliding-window rate limiting for dispatch admissions
//!
//! Every admission is timestamped. On each check, timestamps older than the
//! trailing `interval` are discarded; the attempt is admitted only while fewer
//! than `max_requests` remain.
//!
//! # Example
//!
//! ```text
//! Limit: 3 per 1s
//! t=0.0s  admit, admit, admit     window = [0.0, 0.0, 0.0]
//! t=0.5s  deny                    window unchanged
//! t=1.0s  admit                   window = [1.0]
//! ```
//!
//! This is a sliding-window counter, not a token bucket: up to `max_requests`
//! admissions may land right at a window boundary.

use std::{collections::VecDeque, time::Duration};

use herald_common::tracing;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum admissions per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            interval_ms: default_interval_ms(),
        }
    }
}

const fn default_max_requests() -> u32 {
    10
}

const fn default_interval_ms() -> u64 {
    60_000
}

/// Admission timestamps still inside the window, oldest first
#[derive(Debug, Default)]
struct Window {
    admitted: VecDeque<Instant>,
}

impl Window {
    fn evict(&mut self, now: Instant, interval: Duration) {
        while self
            .admitted
            .front()
            .is_some_and(|&at| now.saturating_duration_since(at) >= interval)
        {
            self.admitted.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    interval: Duration,
    window: Mutex<Window>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: usize::try_from(config.max_requests).unwrap_or(usize::MAX),
            interval: Duration::from_millis(config.interval_ms),
            window: Mutex::new(Window::default()),
        }
    }

    /// Admit one attempt now, if the window has room
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    pub(crate) fn admit_at(&self, now: Instant) -> bool {
        let mut window = self.window.lock();
        window.evict(now, self.interval);

        if window.admitted.len() < self.max_requests {
            window.admitted.push_back(now);
            true
        } else {
            let in_window = window.admitted.len();
            drop(window);
            tracing::debug!(
                in_window,
                limit = self.max_requests,
                "Rate limit exceeded"
            );
            false
        }
    }

    /// Admissions currently counted against the window
    pub fn in_window(&self) -> usize {
        let mut window = self.window.lock();
        window.evict(Instant::now(), self.interval);
        window.admitted.len()
    }
}
