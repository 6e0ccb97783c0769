//! Model Registry - immutable model descriptors behind a swappable snapshot

use crate::errors::ProviderError;
use crate::types::{CapabilityRequirements, PlanTier, RequestCategory};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub text: bool,
    pub vision: bool,
    pub streaming: bool,
    /// Context window in tokens
    pub max_context: u32,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            text: true,
            vision: false,
            streaming: false,
            max_context: 8192,
        }
    }
}

impl ModelCapabilities {
    pub fn satisfies(&self, required: &CapabilityRequirements) -> bool {
        (!required.vision || self.vision)
            && (!required.streaming || self.streaming)
            && self.max_context >= required.min_context
    }
}

/// Price per 1K tokens, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelCost {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelCost {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn estimate(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }

    pub fn is_free(&self) -> bool {
        self.input_per_1k <= 0.0 && self.output_per_1k <= 0.0
    }
}

/// Identity of one logical model. Never mutated once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: String,
    pub capabilities: ModelCapabilities,
    pub cost: ModelCost,
    #[serde(default)]
    pub min_tier: PlanTier,
    /// Baseline quality in 0..=1
    pub quality_score: f64,
    #[serde(default = "default_categories")]
    pub categories: BTreeSet<RequestCategory>,
}

fn default_categories() -> BTreeSet<RequestCategory> {
    BTreeSet::from([RequestCategory::Text])
}

impl ModelDescriptor {
    pub fn new(id: &str, provider: &str) -> Self {
        Self {
            id: id.to_string(),
            provider: provider.to_string(),
            capabilities: ModelCapabilities::default(),
            cost: ModelCost::default(),
            min_tier: PlanTier::Free,
            quality_score: 0.5,
            categories: default_categories(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_cost(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.cost = ModelCost::new(input_per_1k, output_per_1k);
        self
    }

    pub fn with_min_tier(mut self, tier: PlanTier) -> Self {
        self.min_tier = tier;
        self
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = score.clamp(0.0, 1.0);
        self
    }

    pub fn with_categories(mut self, categories: &[RequestCategory]) -> Self {
        self.categories = categories.iter().copied().collect();
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.capabilities.vision = true;
        self
    }

    pub fn with_streaming(mut self) -> Self {
        self.capabilities.streaming = true;
        self
    }

    pub fn serves(&self, category: RequestCategory) -> bool {
        self.categories.contains(&category)
    }

    pub fn accessible_to(&self, plan: PlanTier) -> bool {
        plan >= self.min_tier
    }
}

/// Criteria for [`ModelRegistry::list`]. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub provider: Option<String>,
    pub requirements: Option<CapabilityRequirements>,
    pub category: Option<RequestCategory>,
    /// Only models this plan may use
    pub plan: Option<PlanTier>,
}

impl ModelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn requirements(mut self, requirements: CapabilityRequirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    pub fn category(mut self, category: RequestCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn plan(mut self, plan: PlanTier) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn matches(&self, model: &ModelDescriptor) -> bool {
        self.provider.as_ref().map_or(true, |p| &model.provider == p)
            && self
                .requirements
                .as_ref()
                .map_or(true, |r| model.capabilities.satisfies(r))
            && self.category.map_or(true, |c| model.serves(c))
            && self.plan.map_or(true, |p| model.accessible_to(p))
    }
}

/// Consistent view of the registry at one point in time.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    pub version: u64,
    models: BTreeMap<String, Arc<ModelDescriptor>>,
}

impl RegistrySnapshot {
    pub fn get(&self, model_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.models.get(model_id).cloned()
    }

    /// Ordered by model id.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// External catalogue the registry can be refreshed from.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ModelDescriptor>, ProviderError>;
}

/// Readers take an `Arc` of the current snapshot; writers build a new
/// snapshot and swap it in, so a read never observes a partial update.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: Vec<ModelDescriptor>) -> Self {
        let registry = Self::new();
        registry.replace_all(models);
        registry
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn describe(&self, model_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.snapshot().get(model_id)
    }

    pub fn list(&self, filter: &ModelFilter) -> Vec<Arc<ModelDescriptor>> {
        self.snapshot()
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }

    /// Pure check of plan tier against the model's minimum tier. Unknown
    /// models are never accessible.
    pub fn validate_access(&self, plan: PlanTier, model_id: &str) -> bool {
        self.describe(model_id)
            .map(|m| m.accessible_to(plan))
            .unwrap_or(false)
    }

    /// Swap in a complete new set of models.
    pub fn replace_all(&self, models: Vec<ModelDescriptor>) {
        let mut guard = self.current.write();
        let mut map = BTreeMap::new();
        for model in models {
            if map.insert(model.id.clone(), Arc::new(model)).is_some() {
                warn!("Duplicate model id in registry update, keeping the last one");
            }
        }
        let next = RegistrySnapshot {
            version: guard.version + 1,
            models: map,
        };
        info!(
            "Model registry updated to version {} ({} models)",
            next.version,
            next.len()
        );
        *guard = Arc::new(next);
    }

    /// Replace a single descriptor by publishing a new snapshot.
    pub fn upsert(&self, model: ModelDescriptor) {
        let mut guard = self.current.write();
        let mut models = guard.models.clone();
        debug!("Registering model {} ({})", model.id, model.provider);
        models.insert(model.id.clone(), Arc::new(model));
        *guard = Arc::new(RegistrySnapshot {
            version: guard.version + 1,
            models,
        });
    }

    /// Reload from `source`; on failure the current snapshot is kept.
    pub async fn refresh_from(&self, source: &dyn RegistrySource) -> Result<usize, ProviderError> {
        match source.fetch().await {
            Ok(models) => {
                let count = models.len();
                self.replace_all(models);
                Ok(count)
            }
            Err(e) => {
                warn!("Registry refresh failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> ModelRegistry {
        ModelRegistry::with_models(vec![
            ModelDescriptor::new("fast-text", "openai").with_cost(0.0005, 0.0015),
            ModelDescriptor::new("premium-vision-v2", "anthropic")
                .with_vision()
                .with_min_tier(PlanTier::Pro)
                .with_categories(&[RequestCategory::Text, RequestCategory::Image]),
        ])
    }

    struct FailingSource;

    #[async_trait]
    impl RegistrySource for FailingSource {
        async fn fetch(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
            Err(ProviderError::unavailable("catalogue offline"))
        }
    }

    struct StaticSource(Vec<ModelDescriptor>);

    #[async_trait]
    impl RegistrySource for StaticSource {
        async fn fetch(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_describe_and_access() {
        let registry = seed();
        assert!(registry.describe("fast-text").is_some());
        assert!(registry.describe("missing").is_none());

        assert!(!registry.validate_access(PlanTier::Free, "premium-vision-v2"));
        assert!(registry.validate_access(PlanTier::Pro, "premium-vision-v2"));
        assert!(registry.validate_access(PlanTier::Enterprise, "premium-vision-v2"));
        assert!(!registry.validate_access(PlanTier::Enterprise, "missing"));
    }

    #[test]
    fn test_list_filters_and_orders_by_id() {
        let registry = seed();
        let all = registry.list(&ModelFilter::new());
        let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["fast-text", "premium-vision-v2"]);

        let vision = registry.list(&ModelFilter::new().requirements(CapabilityRequirements {
            vision: true,
            ..Default::default()
        }));
        assert_eq!(vision.len(), 1);

        let free = registry.list(&ModelFilter::new().plan(PlanTier::Free));
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].id, "fast-text");
    }

    #[test]
    fn test_old_snapshot_survives_replace() {
        let registry = seed();
        let before = registry.snapshot();
        registry.replace_all(vec![ModelDescriptor::new("other", "local")]);

        assert_eq!(before.len(), 2);
        assert!(before.get("fast-text").is_some());
        assert_eq!(registry.snapshot().len(), 1);
        assert!(registry.snapshot().version > before.version);
    }

    #[test]
    fn test_upsert_replaces_descriptor() {
        let registry = seed();
        registry.upsert(ModelDescriptor::new("fast-text", "groq"));
        assert_eq!(registry.describe("fast-text").unwrap().provider, "groq");
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let registry = seed();
        assert!(registry.refresh_from(&FailingSource).await.is_err());
        assert_eq!(registry.snapshot().len(), 2);

        let count = registry
            .refresh_from(&StaticSource(vec![ModelDescriptor::new("x", "p")]))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(registry.describe("x").is_some());
    }

    #[test]
    fn test_cost_estimate() {
        let cost = ModelCost::new(0.01, 0.03);
        let estimate = cost.estimate(1000, 2000);
        assert!((estimate - 0.07).abs() < 1e-9);
        assert!(ModelCost::default().is_free());
    }
}
