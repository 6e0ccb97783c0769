use super::UsageEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTrend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

/// Response-time trend; a faster second half is `Improving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTrend {
    Improving,
    Declining,
    #[default]
    Stable,
}

/// Derived view over one model's events in a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub model_id: String,
    pub window_hours: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    /// Latency figures cover successful requests only
    pub avg_response_time_ms: f64,
    pub median_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
    pub total_tokens: u64,
    pub cost_trend: CostTrend,
    pub performance_trend: PerformanceTrend,
    pub computed_at: DateTime<Utc>,
}

impl PerformanceMetrics {
    pub fn empty(model_id: &str, window_hours: u64) -> Self {
        Self {
            model_id: model_id.to_string(),
            window_hours,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            success_rate: 0.0,
            avg_response_time_ms: 0.0,
            median_response_time_ms: 0.0,
            p95_response_time_ms: 0.0,
            total_cost: 0.0,
            avg_cost: 0.0,
            total_tokens: 0,
            cost_trend: CostTrend::Stable,
            performance_trend: PerformanceTrend::Stable,
            computed_at: Utc::now(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.total_requests > 0
    }
}

/// Thresholds for trend classification.
#[derive(Debug, Clone, Copy)]
pub struct TrendSettings {
    /// Relative change between halves, e.g. 0.10 for 10 %
    pub threshold: f64,
    pub min_events: usize,
}

/// Compute metrics for `events`, which must all belong to `model_id`.
pub fn compute_metrics(
    model_id: &str,
    window_hours: u64,
    events: &[&UsageEvent],
    trend: TrendSettings,
) -> PerformanceMetrics {
    if events.is_empty() {
        return PerformanceMetrics::empty(model_id, window_hours);
    }

    let mut ordered: Vec<&UsageEvent> = events.to_vec();
    ordered.sort_by_key(|e| e.timestamp);

    let total = ordered.len() as u64;
    let successful = ordered.iter().filter(|e| e.success).count() as u64;
    let total_cost: f64 = ordered.iter().map(|e| e.cost).sum();
    let total_tokens: u64 = ordered
        .iter()
        .map(|e| (e.input_tokens + e.output_tokens) as u64)
        .sum();

    // Failed attempts cost nothing and often end at the timeout.
    let succeeded: Vec<&UsageEvent> = ordered.iter().copied().filter(|e| e.success).collect();
    let mut latencies: Vec<f64> = succeeded
        .iter()
        .map(|e| e.response_time_ms as f64)
        .collect();
    latencies.sort_by(|a, b| a.total_cmp(b));

    PerformanceMetrics {
        model_id: model_id.to_string(),
        window_hours,
        total_requests: total,
        successful_requests: successful,
        failed_requests: total - successful,
        success_rate: successful as f64 / total as f64,
        avg_response_time_ms: mean(&latencies),
        median_response_time_ms: median(&latencies),
        p95_response_time_ms: percentile(&latencies, 0.95),
        total_cost,
        avg_cost: total_cost / total as f64,
        total_tokens,
        cost_trend: cost_trend(&succeeded, trend),
        performance_trend: performance_trend(&succeeded, trend),
        computed_at: Utc::now(),
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// `sorted` must be ascending.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Nearest-rank percentile; `sorted` must be ascending.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Relative change of the second half's mean over the first half's, with
/// events already ordered by time. `None` when there are too few events.
fn half_change(
    ordered: &[&UsageEvent],
    min_events: usize,
    value: impl Fn(&UsageEvent) -> f64,
) -> Option<f64> {
    if ordered.len() < min_events.max(2) {
        return None;
    }
    let (first, second) = ordered.split_at(ordered.len() / 2);
    let first_mean = first.iter().map(|e| value(*e)).sum::<f64>() / first.len() as f64;
    let second_mean = second.iter().map(|e| value(*e)).sum::<f64>() / second.len() as f64;

    if first_mean == 0.0 {
        return Some(if second_mean > 0.0 { f64::INFINITY } else { 0.0 });
    }
    Some((second_mean - first_mean) / first_mean)
}

fn cost_trend(ordered: &[&UsageEvent], settings: TrendSettings) -> CostTrend {
    match half_change(ordered, settings.min_events, |e| e.cost) {
        Some(change) if change > settings.threshold => CostTrend::Increasing,
        Some(change) if change < -settings.threshold => CostTrend::Decreasing,
        _ => CostTrend::Stable,
    }
}

fn performance_trend(ordered: &[&UsageEvent], settings: TrendSettings) -> PerformanceTrend {
    match half_change(ordered, settings.min_events, |e| e.response_time_ms as f64) {
        Some(change) if change > settings.threshold => PerformanceTrend::Declining,
        Some(change) if change < -settings.threshold => PerformanceTrend::Improving,
        _ => PerformanceTrend::Stable,
    }
}
