use super::metrics::{
    compute_metrics, CostTrend, PerformanceMetrics, PerformanceTrend, TrendSettings,
};
use super::{AnalyticsConfig, UsageEvent};
use crate::types::RequestCategory;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Hour,
    Day,
    Week,
    Month,
}

impl ReportPeriod {
    pub fn hours(self) -> u64 {
        match self {
            ReportPeriod::Hour => 1,
            ReportPeriod::Day => 24,
            ReportPeriod::Week => 24 * 7,
            ReportPeriod::Month => 24 * 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model_id: String,
    pub provider: String,
    pub requests: u64,
    pub success_rate: f64,
    pub total_cost: f64,
    /// Fraction of the period's total spend
    pub cost_share: f64,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryUsage {
    pub requests: u64,
    pub total_cost: f64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerUsage {
    pub caller_id: String,
    pub requests: u64,
    pub total_cost: f64,
}

/// Operator-facing alerts and optimization suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum AnalyticsSignal {
    HighErrorRate {
        model_id: String,
        error_rate: f64,
    },
    SlowResponses {
        model_id: String,
        p95_response_time_ms: f64,
    },
    CostIncreasing {
        model_id: String,
    },
    PerformanceDeclining {
        model_id: String,
    },
    CostConcentration {
        model_id: String,
        cost_share: f64,
        cheaper_alternative: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub period: ReportPeriod,
    pub window_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
    pub total_tokens: u64,
    /// Highest spend first
    pub per_model: Vec<ModelUsage>,
    pub per_category: BTreeMap<RequestCategory, CategoryUsage>,
    pub top_callers: Vec<CallerUsage>,
    pub signals: Vec<AnalyticsSignal>,
}

pub(super) fn build_report(
    period: ReportPeriod,
    events: &[&UsageEvent],
    config: &AnalyticsConfig,
    now: DateTime<Utc>,
) -> UsageReport {
    let trend = TrendSettings {
        threshold: config.trend_threshold,
        min_events: config.min_events_for_trend,
    };

    let total_requests = events.len() as u64;
    let successful_requests = events.iter().filter(|e| e.success).count() as u64;
    let total_cost: f64 = events.iter().map(|e| e.cost).sum();
    let total_tokens: u64 = events
        .iter()
        .map(|e| (e.input_tokens + e.output_tokens) as u64)
        .sum();

    let mut by_model: BTreeMap<&str, Vec<&UsageEvent>> = BTreeMap::new();
    let mut per_category: BTreeMap<RequestCategory, CategoryUsage> = BTreeMap::new();
    let mut by_caller: HashMap<&str, CallerUsage> = HashMap::new();

    for &event in events {
        by_model.entry(event.model_id.as_str()).or_default().push(event);

        let category = per_category.entry(event.category).or_default();
        category.requests += 1;
        category.total_cost += event.cost;
        category.total_tokens += (event.input_tokens + event.output_tokens) as u64;

        let caller = by_caller
            .entry(event.caller_id.as_str())
            .or_insert_with(|| CallerUsage {
                caller_id: event.caller_id.clone(),
                requests: 0,
                total_cost: 0.0,
            });
        caller.requests += 1;
        caller.total_cost += event.cost;
    }

    let mut per_model: Vec<ModelUsage> = by_model
        .into_iter()
        .map(|(model_id, model_events)| {
            let metrics = compute_metrics(model_id, period.hours(), &model_events, trend);
            ModelUsage {
                model_id: model_id.to_string(),
                provider: model_events
                    .last()
                    .map(|e| e.provider.clone())
                    .unwrap_or_default(),
                requests: metrics.total_requests,
                success_rate: metrics.success_rate,
                total_cost: metrics.total_cost,
                cost_share: if total_cost > 0.0 {
                    metrics.total_cost / total_cost
                } else {
                    0.0
                },
                metrics,
            }
        })
        .collect();
    per_model.sort_by(|a, b| {
        b.total_cost
            .total_cmp(&a.total_cost)
            .then_with(|| a.model_id.cmp(&b.model_id))
    });

    let mut top_callers: Vec<CallerUsage> = by_caller.into_values().collect();
    top_callers.sort_by(|a, b| {
        b.requests
            .cmp(&a.requests)
            .then_with(|| b.total_cost.total_cmp(&a.total_cost))
            .then_with(|| a.caller_id.cmp(&b.caller_id))
    });
    top_callers.truncate(config.top_callers);

    let signals = derive_signals(&per_model, config);

    UsageReport {
        period,
        window_start: now - Duration::hours(period.hours() as i64),
        generated_at: now,
        total_requests,
        successful_requests,
        success_rate: if total_requests > 0 {
            successful_requests as f64 / total_requests as f64
        } else {
            0.0
        },
        total_cost,
        avg_cost: if total_requests > 0 {
            total_cost / total_requests as f64
        } else {
            0.0
        },
        total_tokens,
        per_model,
        per_category,
        top_callers,
        signals,
    }
}

fn derive_signals(per_model: &[ModelUsage], config: &AnalyticsConfig) -> Vec<AnalyticsSignal> {
    let mut signals = Vec::new();

    for usage in per_model {
        let metrics = &usage.metrics;
        let error_rate = 1.0 - metrics.success_rate;

        if metrics.total_requests >= config.min_events_for_signals as u64
            && error_rate > config.high_error_rate
        {
            signals.push(AnalyticsSignal::HighErrorRate {
                model_id: usage.model_id.clone(),
                error_rate,
            });
        }

        if metrics.p95_response_time_ms > config.slow_p95_ms {
            signals.push(AnalyticsSignal::SlowResponses {
                model_id: usage.model_id.clone(),
                p95_response_time_ms: metrics.p95_response_time_ms,
            });
        }

        if metrics.cost_trend == CostTrend::Increasing {
            signals.push(AnalyticsSignal::CostIncreasing {
                model_id: usage.model_id.clone(),
            });
        }

        if metrics.performance_trend == PerformanceTrend::Declining {
            signals.push(AnalyticsSignal::PerformanceDeclining {
                model_id: usage.model_id.clone(),
            });
        }

        if usage.cost_share > config.cost_concentration_share && per_model.len() > 1 {
            signals.push(AnalyticsSignal::CostConcentration {
                model_id: usage.model_id.clone(),
                cost_share: usage.cost_share,
                cheaper_alternative: cheaper_alternative(usage, per_model, config),
            });
        }
    }

    signals
}

/// Cheapest other model, per request, that is at least as reliable as the
/// configured floor.
fn cheaper_alternative(
    usage: &ModelUsage,
    per_model: &[ModelUsage],
    config: &AnalyticsConfig,
) -> Option<String> {
    per_model
        .iter()
        .filter(|other| other.model_id != usage.model_id)
        .filter(|other| other.success_rate >= config.alternative_min_success_rate)
        .filter(|other| other.metrics.avg_cost < usage.metrics.avg_cost)
        .min_by(|a, b| {
            a.metrics
                .avg_cost
                .total_cmp(&b.metrics.avg_cost)
                .then_with(|| a.model_id.cmp(&b.model_id))
        })
        .map(|other| other.model_id.clone())
}
