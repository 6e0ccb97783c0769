//! Request admission and dispatch for the model routing core.
//!
//! [`Router`] ties the pieces together: per-caller [`RateLimiter`],
//! [`RequestValidator`], plan-aware candidate resolution, an optional
//! [`ResponseCache`], and strictly ordered fallback across provider adapters.

pub mod access;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod maintenance;
pub mod rate_limiter;
pub mod validation;

pub use access::{PlanResolver, StaticPlanResolver};
pub use cache::{CacheConfig, ResponseCache};
pub use config::{DispatchConfig, MaintenanceConfig, RouterConfig, APP_NAME};
pub use dispatcher::{CandidateOrigin, CandidatePlan, Router, RouterBuilder};
pub use maintenance::MaintenanceHandle;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use validation::{RequestValidator, ValidationConfig};
