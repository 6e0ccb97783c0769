//! Usage Analytics Engine
//!
//! Append-only [`UsageEvent`] ring with on-demand [`PerformanceMetrics`],
//! a short-lived per-model metrics cache and period reports with signals.

pub mod metrics;
pub mod report;

pub use metrics::{CostTrend, PerformanceMetrics, PerformanceTrend};
pub use report::{
    AnalyticsSignal, CallerUsage, CategoryUsage, ModelUsage, ReportPeriod, UsageReport,
};

use crate::errors::ProviderErrorKind;
use crate::types::{RequestCategory, TokenUsage};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use metrics::{compute_metrics, TrendSettings};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// One completed provider attempt. Never mutated after recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub caller_id: String,
    pub model_id: String,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub response_time_ms: u64,
    pub success: bool,
    pub error_kind: Option<ProviderErrorKind>,
    pub cost: f64,
    pub category: RequestCategory,
}

impl UsageEvent {
    pub fn new(caller_id: &str, model_id: &str, provider: &str, category: RequestCategory) -> Self {
        Self {
            caller_id: caller_id.to_string(),
            model_id: model_id.to_string(),
            provider: provider.to_string(),
            timestamp: Utc::now(),
            input_tokens: 0,
            output_tokens: 0,
            response_time_ms: 0,
            success: true,
            error_kind: None,
            cost: 0.0,
            category,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.input_tokens = usage.input_tokens;
        self.output_tokens = usage.output_tokens;
        self
    }

    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = ms;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn failed(mut self, kind: ProviderErrorKind) -> Self {
        self.success = false;
        self.error_kind = Some(kind);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Most recent events kept; older ones are evicted
    pub capacity: usize,
    pub retention_days: u64,
    pub metrics_cache_ttl_secs: u64,
    pub trend_threshold: f64,
    pub min_events_for_trend: usize,
    pub high_error_rate: f64,
    pub min_events_for_signals: usize,
    pub slow_p95_ms: f64,
    /// Spend share above which one model is flagged
    pub cost_concentration_share: f64,
    pub alternative_min_success_rate: f64,
    pub top_callers: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retention_days: 30,
            metrics_cache_ttl_secs: 60,
            trend_threshold: 0.10,
            min_events_for_trend: 4,
            high_error_rate: 0.10,
            min_events_for_signals: 5,
            slow_p95_ms: 5_000.0,
            cost_concentration_share: 0.5,
            alternative_min_success_rate: 0.9,
            top_callers: 5,
        }
    }
}

struct CachedMetrics {
    metrics: PerformanceMetrics,
    computed_at: Instant,
}

pub struct UsageAnalytics {
    config: AnalyticsConfig,
    events: RwLock<VecDeque<UsageEvent>>,
    /// model id → window hours → metrics
    metrics_cache: DashMap<String, HashMap<u64, CachedMetrics>>,
}

impl Default for UsageAnalytics {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

impl UsageAnalytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(config.capacity.min(1024))),
            metrics_cache: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    fn trend_settings(&self) -> TrendSettings {
        TrendSettings {
            threshold: self.config.trend_threshold,
            min_events: self.config.min_events_for_trend,
        }
    }

    pub fn record(&self, event: UsageEvent) {
        let model_id = event.model_id.clone();
        let evicted = {
            let mut events = self.events.write();
            events.push_back(event);
            let mut evicted = Vec::new();
            while events.len() > self.config.capacity.max(1) {
                if let Some(old) = events.pop_front() {
                    evicted.push(old.model_id);
                }
            }
            evicted
        };

        self.metrics_cache.remove(&model_id);
        for old_model in evicted {
            self.metrics_cache.remove(&old_model);
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Newest last.
    pub fn recent(&self, limit: usize) -> Vec<UsageEvent> {
        let events = self.events.read();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn metrics_for(&self, model_id: &str, window_hours: u64) -> PerformanceMetrics {
        let ttl = Duration::from_secs(self.config.metrics_cache_ttl_secs);

        if let Some(cached) = self.metrics_cache.get(model_id) {
            if let Some(entry) = cached.get(&window_hours) {
                if entry.computed_at.elapsed() < ttl {
                    return entry.metrics.clone();
                }
            }
        }

        let since = Utc::now() - ChronoDuration::hours(window_hours as i64);
        // The entry is published while the read guard is held so a concurrent
        // `record` always invalidates after it, never before.
        let events = self.events.read();
        let matching: Vec<&UsageEvent> = events
            .iter()
            .filter(|e| e.model_id == model_id && e.timestamp >= since)
            .collect();
        let metrics = compute_metrics(model_id, window_hours, &matching, self.trend_settings());

        self.metrics_cache
            .entry(model_id.to_string())
            .or_default()
            .insert(
                window_hours,
                CachedMetrics {
                    metrics: metrics.clone(),
                    computed_at: Instant::now(),
                },
            );
        metrics
    }

    /// Metrics for every model with events in the window.
    pub fn metrics_snapshot(&self, window_hours: u64) -> BTreeMap<String, PerformanceMetrics> {
        let since = Utc::now() - ChronoDuration::hours(window_hours as i64);
        let models: HashSet<String> = self
            .events
            .read()
            .iter()
            .filter(|e| e.timestamp >= since)
            .map(|e| e.model_id.clone())
            .collect();

        models
            .into_iter()
            .map(|model| {
                let metrics = self.metrics_for(&model, window_hours);
                (model, metrics)
            })
            .collect()
    }

    pub fn report(&self, period: ReportPeriod) -> UsageReport {
        let now = Utc::now();
        let since = now - ChronoDuration::hours(period.hours() as i64);
        let events = self.events.read();
        let matching: Vec<&UsageEvent> = events.iter().filter(|e| e.timestamp >= since).collect();
        let report = report::build_report(period, &matching, &self.config, now);
        debug!(
            period = ?period,
            total_requests = report.total_requests,
            signals = report.signals.len(),
            "Usage report generated"
        );
        report
    }

    /// Drop events older than the retention horizon. Returns how many were
    /// removed.
    pub fn cleanup(&self) -> usize {
        let horizon = Utc::now() - ChronoDuration::days(self.config.retention_days as i64);
        let removed = {
            let mut events = self.events.write();
            let before = events.len();
            events.retain(|e| e.timestamp >= horizon);
            before - events.len()
        };

        if removed > 0 {
            self.metrics_cache.clear();
            info!("Analytics cleanup removed {} expired events", removed);
        }
        removed
    }
}
