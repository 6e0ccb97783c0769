//! Per-caller fixed-window rate limiting.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests accepted per caller per window
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    reset_at: Instant,
}

/// Windows are created lazily per caller and replaced wholesale on rollover.
/// Each caller's window sits behind its own map shard lock.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, RateLimitWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Count this request against `caller_id` and report whether it fits.
    pub fn allow(&self, caller_id: &str) -> bool {
        let now = Instant::now();
        let window = self.window();

        let mut entry = self
            .windows
            .entry(caller_id.to_string())
            .or_insert(RateLimitWindow {
                count: 0,
                reset_at: now + window,
            });

        if now >= entry.reset_at {
            *entry = RateLimitWindow {
                count: 1,
                reset_at: now + window,
            };
            return true;
        }

        entry.count = entry.count.saturating_add(1);
        let allowed = entry.count <= self.config.max_requests;
        if !allowed {
            debug!(caller = %caller_id, count = entry.count, "Rate limit exceeded");
        }
        allowed
    }

    /// Time until the caller's current window resets.
    pub fn retry_after(&self, caller_id: &str) -> Duration {
        self.windows
            .get(caller_id)
            .map(|w| w.reset_at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Requests left in the caller's current window.
    pub fn remaining(&self, caller_id: &str) -> u32 {
        let now = Instant::now();
        match self.windows.get(caller_id) {
            Some(w) if now < w.reset_at => self.config.max_requests.saturating_sub(w.count),
            _ => self.config.max_requests,
        }
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn sweep_stale(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.reset_at);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!("Swept {} stale rate-limit windows", removed);
        }
        removed
    }

    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}
