//! Health Tracker - rolling per-provider status from observed outcomes
//!
//! Every adapter call reports `(provider, response_time_ms, success)`. State
//! lives in a [`DashMap`] so outcomes for different providers never contend
//! on the same lock.
//!
//! Transitions:
//! - `healthy → degraded` when the trailing error rate exceeds
//!   `degraded_error_rate` or the EWMA latency exceeds `degraded_latency_ms`
//! - `→ down` when the trailing error rate exceeds `down_error_rate` (with at
//!   least `min_observations_for_down` observations) or consecutive failures
//!   reach `consecutive_failures_for_down`
//! - any state `→ healthy` once `cooldown_secs` pass without a failure; the
//!   trailing window is cleared at that point
//!
//! Cooldown is evaluated lazily whenever a provider is read or recorded.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Trailing observations used for the error rate
    pub window_size: usize,
    pub ewma_alpha: f64,
    pub degraded_error_rate: f64,
    pub degraded_latency_ms: f64,
    pub down_error_rate: f64,
    pub min_observations_for_down: usize,
    pub consecutive_failures_for_down: u32,
    pub cooldown_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            ewma_alpha: 0.3,
            degraded_error_rate: 0.05,
            degraded_latency_ms: 10_000.0,
            down_error_rate: 0.5,
            min_observations_for_down: 4,
            consecutive_failures_for_down: 5,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Down,
}

/// Read-only view of one provider's rolling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthRecord {
    pub provider: String,
    pub status: HealthStatus,
    pub avg_response_time_ms: f64,
    /// Over the trailing window
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_observed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
}

#[derive(Debug)]
struct ProviderState {
    status: HealthStatus,
    /// `true` = failure
    window: VecDeque<bool>,
    ewma_ms: Option<f64>,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_observed: Option<DateTime<Utc>>,
    total_requests: u64,
    total_failures: u64,
}

impl ProviderState {
    fn new(window_size: usize) -> Self {
        Self {
            status: HealthStatus::Healthy,
            window: VecDeque::with_capacity(window_size),
            ewma_ms: None,
            consecutive_failures: 0,
            last_failure: None,
            last_observed: None,
            total_requests: 0,
            total_failures: 0,
        }
    }

    fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|f| **f).count();
        failures as f64 / self.window.len() as f64
    }

    /// Returns true when the state was reset.
    fn apply_cooldown(&mut self, cooldown: Duration, now: Instant) -> bool {
        let Some(last_failure) = self.last_failure else {
            return false;
        };
        if now.saturating_duration_since(last_failure) < cooldown {
            return false;
        }

        self.window.clear();
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.ewma_ms = None;
        let was = std::mem::replace(&mut self.status, HealthStatus::Healthy);
        was != HealthStatus::Healthy
    }

    fn evaluate(&self, config: &HealthConfig) -> HealthStatus {
        let error_rate = self.error_rate();

        if self.consecutive_failures >= config.consecutive_failures_for_down
            || (self.window.len() >= config.min_observations_for_down
                && error_rate > config.down_error_rate)
        {
            HealthStatus::Down
        } else if error_rate > config.degraded_error_rate
            || self.ewma_ms.unwrap_or(0.0) > config.degraded_latency_ms
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    fn to_record(&self, provider: &str) -> ProviderHealthRecord {
        ProviderHealthRecord {
            provider: provider.to_string(),
            status: self.status,
            avg_response_time_ms: self.ewma_ms.unwrap_or(0.0),
            error_rate: self.error_rate(),
            consecutive_failures: self.consecutive_failures,
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            last_observed: self.last_observed,
        }
    }
}

pub struct HealthTracker {
    config: HealthConfig,
    providers: DashMap<String, ProviderState>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            providers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    /// Record one adapter outcome and return the provider's new status.
    pub fn record_outcome(&self, provider: &str, response_time_ms: u64, success: bool) -> HealthStatus {
        let now = Instant::now();
        let mut state = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(self.config.window_size));

        if state.apply_cooldown(self.cooldown(), now) {
            info!(provider = %provider, "Provider recovered after cooldown");
        }

        if state.window.len() >= self.config.window_size.max(1) {
            state.window.pop_front();
        }
        state.window.push_back(!success);

        let sample = response_time_ms as f64;
        state.ewma_ms = Some(match state.ewma_ms {
            Some(prev) => self.config.ewma_alpha * sample + (1.0 - self.config.ewma_alpha) * prev,
            None => sample,
        });

        state.total_requests += 1;
        state.last_observed = Some(Utc::now());
        if success {
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
            state.total_failures += 1;
            state.last_failure = Some(now);
        }

        let previous = state.status;
        let next = state.evaluate(&self.config);
        state.status = next;

        if previous != next {
            match next {
                HealthStatus::Down => warn!(
                    provider = %provider,
                    consecutive_failures = state.consecutive_failures,
                    error_rate = state.error_rate(),
                    "Provider marked down"
                ),
                HealthStatus::Degraded => warn!(
                    provider = %provider,
                    error_rate = state.error_rate(),
                    avg_response_time_ms = state.ewma_ms.unwrap_or(0.0),
                    "Provider degraded"
                ),
                HealthStatus::Healthy => info!(provider = %provider, "Provider healthy again"),
            }
        } else {
            debug!(provider = %provider, success, response_time_ms, "Recorded provider outcome");
        }

        next
    }

    /// Unknown providers are reported healthy.
    pub fn status(&self, provider: &str) -> HealthStatus {
        let cooldown = self.cooldown();
        match self.providers.get_mut(provider) {
            Some(mut state) => {
                state.apply_cooldown(cooldown, Instant::now());
                state.status
            }
            None => HealthStatus::Healthy,
        }
    }

    pub fn record(&self, provider: &str) -> Option<ProviderHealthRecord> {
        let cooldown = self.cooldown();
        self.providers.get_mut(provider).map(|mut state| {
            state.apply_cooldown(cooldown, Instant::now());
            state.to_record(provider)
        })
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProviderHealthRecord> {
        let cooldown = self.cooldown();
        let now = Instant::now();
        self.providers
            .iter_mut()
            .map(|mut entry| {
                entry.value_mut().apply_cooldown(cooldown, now);
                let record = entry.value().to_record(entry.key());
                (entry.key().clone(), record)
            })
            .collect()
    }

    pub fn summary(&self) -> HealthSummary {
        self.snapshot()
            .values()
            .fold(HealthSummary::default(), |mut acc, record| {
                match record.status {
                    HealthStatus::Healthy => acc.healthy += 1,
                    HealthStatus::Degraded => acc.degraded += 1,
                    HealthStatus::Down => acc.down += 1,
                }
                acc
            })
    }
}
