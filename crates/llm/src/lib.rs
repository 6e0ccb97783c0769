pub mod analytics;
mod cost_optimizer;
mod errors;
mod health;
pub mod providers;
mod registry;
mod streaming;
mod types;

pub use analytics::{
    AnalyticsConfig, AnalyticsSignal, CostTrend, PerformanceMetrics, PerformanceTrend,
    ReportPeriod, UsageAnalytics, UsageEvent, UsageReport,
};
pub use cost_optimizer::*;
pub use errors::*;
pub use health::*;
pub use providers::{
    AdapterCapabilities, ProviderAdapter, ProviderEvent, ProviderReply, ProviderRequest,
};
pub use registry::*;
pub use streaming::*;
pub use types::*;
