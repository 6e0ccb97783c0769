//! Plan resolution seam; subscription state lives outside the router.

use async_trait::async_trait;
use dashmap::DashMap;
use llm::{GenerateError, PlanTier};

#[async_trait]
pub trait PlanResolver: Send + Sync {
    async fn resolve_plan(&self, caller_id: &str) -> Result<PlanTier, GenerateError>;
}

/// In-memory plan table with a fallback tier for unknown callers.
pub struct StaticPlanResolver {
    plans: DashMap<String, PlanTier>,
    default_tier: PlanTier,
}

impl StaticPlanResolver {
    pub fn new(default_tier: PlanTier) -> Self {
        Self {
            plans: DashMap::new(),
            default_tier,
        }
    }

    pub fn with_plan(self, caller_id: &str, tier: PlanTier) -> Self {
        self.plans.insert(caller_id.to_string(), tier);
        self
    }

    pub fn set_plan(&self, caller_id: &str, tier: PlanTier) {
        self.plans.insert(caller_id.to_string(), tier);
    }
}

impl Default for StaticPlanResolver {
    fn default() -> Self {
        Self::new(PlanTier::Free)
    }
}

#[async_trait]
impl PlanResolver for StaticPlanResolver {
    async fn resolve_plan(&self, caller_id: &str) -> Result<PlanTier, GenerateError> {
        Ok(self
            .plans
            .get(caller_id)
            .map(|tier| *tier)
            .unwrap_or(self.default_tier))
    }
}
