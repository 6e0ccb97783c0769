use crate::cache::CacheConfig;
use crate::rate_limiter::RateLimitConfig;
use crate::validation::ValidationConfig;
use anyhow::{bail, Result};
use common::{ConfigLoader, ConfigSource, LoggingConfig};
use llm::{AnalyticsConfig, HealthConfig, OptimizerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application name used for config file lookup and the env prefix
/// (`MODEL_ROUTER_`).
pub const APP_NAME: &str = "model-router";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub validation: ValidationConfig,
    pub dispatch: DispatchConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub analytics: AnalyticsConfig,
    pub optimizer: OptimizerConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on one provider call
    pub attempt_timeout_ms: u64,
    /// Word group size for simulated streaming
    pub stream_chunk_words: usize,
    /// Metrics window fed to the optimizer
    pub metrics_window_hours: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 30_000,
            stream_chunk_words: 20,
            metrics_window_hours: 24,
        }
    }
}

impl DispatchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Background task intervals. Zero disables a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub rate_limit_sweep_secs: u64,
    pub analytics_cleanup_secs: u64,
    pub registry_refresh_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            rate_limit_sweep_secs: 300,
            analytics_cleanup_secs: 3_600,
            registry_refresh_secs: 0,
        }
    }
}

impl RouterConfig {
    /// Install the global tracing subscriber from the `logging` section.
    /// Call once, before building the router.
    pub fn init_logging(&self) -> Result<()> {
        common::init_structured_logging(self.logging.clone())
    }

    /// Load from the default locations and `MODEL_ROUTER_*` variables.
    pub fn load() -> Result<Self> {
        let (config, source) = ConfigLoader::new(APP_NAME).load::<Self>()?;
        Self::finish_load(config, source)
    }

    /// Load from one file plus environment overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let (config, source) = ConfigLoader::new(APP_NAME)
            .with_only_path(path.as_ref())
            .load::<Self>()?;
        Self::finish_load(config, source)
    }

    fn finish_load(config: Self, source: ConfigSource) -> Result<Self> {
        config.validate()?;
        info!(source = ?source, "Router configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            bail!("rate_limit.max_requests must be greater than 0");
        }
        if self.rate_limit.window_secs == 0 {
            bail!("rate_limit.window_secs must be greater than 0");
        }
        if self.validation.max_input_chars == 0 {
            bail!("validation.max_input_chars must be greater than 0");
        }
        if self.dispatch.attempt_timeout_ms == 0 {
            bail!("dispatch.attempt_timeout_ms must be greater than 0");
        }
        if self.dispatch.stream_chunk_words == 0 {
            bail!("dispatch.stream_chunk_words must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.health.ewma_alpha) || self.health.ewma_alpha == 0.0 {
            bail!("health.ewma_alpha must be in (0, 1]");
        }
        if self.health.degraded_error_rate > self.health.down_error_rate {
            bail!("health.degraded_error_rate must not exceed health.down_error_rate");
        }
        if self.health.window_size == 0 {
            bail!("health.window_size must be greater than 0");
        }
        if self.analytics.capacity == 0 {
            bail!("analytics.capacity must be greater than 0");
        }
        if self.optimizer.acceptable_ratio > self.optimizer.recommended_ratio {
            bail!("optimizer.acceptable_ratio must not exceed optimizer.recommended_ratio");
        }
        Ok(())
    }
}
