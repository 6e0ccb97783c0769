//! Cost Optimizer - ranks registry models for a task by cost and quality.
//!
//! [`CostOptimizer::optimize`] is a pure function of the registry snapshot
//! and the metrics snapshot passed in; calling it repeatedly with the same
//! inputs returns the same ranking.

use crate::analytics::PerformanceMetrics;
use crate::registry::{ModelDescriptor, RegistrySnapshot};
use crate::types::{
    CapabilityRequirements, GenerateRequest, MessageRole, Mode, PlanTier, QualityPreference,
    RequestCategory,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

const COMPLEX_KEYWORDS: &[&str] = &[
    "analyze",
    "analyse",
    "architecture",
    "design",
    "prove",
    "derive",
    "refactor",
    "optimize",
    "debug",
    "step by step",
    "compare",
    "research",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    Simple,
    Moderate,
    Complex,
}

/// Expected shape of the work, used for cost estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProfile {
    pub estimated_input_tokens: u32,
    pub expected_output_tokens: u32,
    pub category: RequestCategory,
    pub complexity: TaskComplexity,
}

impl TaskProfile {
    pub fn new(input_tokens: u32, output_tokens: u32, category: RequestCategory) -> Self {
        Self {
            estimated_input_tokens: input_tokens,
            expected_output_tokens: output_tokens,
            category,
            complexity: TaskComplexity::Simple,
        }
    }

    pub fn with_complexity(mut self, complexity: TaskComplexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn from_request(request: &GenerateRequest) -> Self {
        let input_tokens = request.estimated_input_tokens();
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();

        let mut complexity = if input_tokens > 2000
            || COMPLEX_KEYWORDS.iter().any(|k| last_user.contains(k))
        {
            TaskComplexity::Complex
        } else if input_tokens > 500 || request.messages.len() > 6 {
            TaskComplexity::Moderate
        } else {
            TaskComplexity::Simple
        };

        if matches!(request.resolved_mode(), Mode::FullThink | Mode::UltraThink) {
            complexity = TaskComplexity::Complex;
        }

        Self {
            estimated_input_tokens: input_tokens,
            expected_output_tokens: request.token_budget(),
            category: request.category,
            complexity,
        }
    }

    pub fn estimate_cost(&self, model: &ModelDescriptor) -> f64 {
        model
            .cost
            .estimate(self.estimated_input_tokens, self.expected_output_tokens)
    }
}

/// Inputs for one optimization decision.
#[derive(Debug, Clone)]
pub struct OptimizationQuery {
    pub task: TaskProfile,
    pub requirements: CapabilityRequirements,
    pub quality: QualityPreference,
    /// Baseline for the savings figure
    pub current_model: Option<String>,
    pub plan: PlanTier,
}

impl OptimizationQuery {
    pub fn new(task: TaskProfile, plan: PlanTier) -> Self {
        Self {
            task,
            requirements: CapabilityRequirements::default(),
            quality: QualityPreference::Balanced,
            current_model: None,
            plan,
        }
    }

    pub fn for_request(request: &GenerateRequest, plan: PlanTier) -> Self {
        Self {
            task: TaskProfile::from_request(request),
            requirements: request.requirements(),
            quality: request.quality,
            current_model: request.model.clone(),
            plan,
        }
    }

    pub fn with_requirements(mut self, requirements: CapabilityRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_quality(mut self, quality: QualityPreference) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_current_model(mut self, model_id: &str) -> Self {
        self.current_model = Some(model_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Suitability {
    Recommended,
    Acceptable,
    NotRecommended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetImpact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAlternative {
    pub model_id: String,
    pub provider: String,
    pub estimated_cost: f64,
    pub quality_score: f64,
    pub score: f64,
    pub label: Suitability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub recommended_model: String,
    pub provider: String,
    pub estimated_cost: f64,
    pub quality_score: f64,
    pub reasoning: String,
    /// Next-best models, best first
    pub alternatives: Vec<ModelAlternative>,
    /// Never negative
    pub potential_savings: f64,
    pub budget_impact: BudgetImpact,
}

impl OptimizationResult {
    /// Recommendation followed by the alternatives.
    pub fn candidate_order(&self) -> Vec<String> {
        std::iter::once(self.recommended_model.clone())
            .chain(self.alternatives.iter().map(|a| a.model_id.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_alternatives: usize,
    /// Weight of the observed success rate in the quality score
    pub observed_quality_weight: f64,
    pub min_observations: u64,
    pub recommended_ratio: f64,
    pub acceptable_ratio: f64,
    pub low_budget_below: f64,
    pub medium_budget_below: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_alternatives: 3,
            observed_quality_weight: 0.3,
            min_observations: 5,
            recommended_ratio: 0.85,
            acceptable_ratio: 0.6,
            low_budget_below: 0.01,
            medium_budget_below: 0.10,
        }
    }
}

struct Scored<'a> {
    model: &'a ModelDescriptor,
    cost: f64,
    quality: f64,
    score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CostOptimizer {
    config: OptimizerConfig,
}

impl CostOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// (cost, quality) weights for a preference.
    pub fn weights(preference: QualityPreference) -> (f64, f64) {
        match preference {
            QualityPreference::Economy => (0.7, 0.3),
            QualityPreference::Balanced => (0.5, 0.5),
            QualityPreference::Premium => (0.2, 0.8),
        }
    }

    /// Rank every model that fits the query. `None` when nothing qualifies.
    pub fn optimize(
        &self,
        registry: &RegistrySnapshot,
        metrics: &BTreeMap<String, PerformanceMetrics>,
        query: &OptimizationQuery,
    ) -> Option<OptimizationResult> {
        let eligible: Vec<&ModelDescriptor> = registry
            .iter()
            .map(|m| m.as_ref())
            .filter(|m| m.capabilities.satisfies(&query.requirements))
            .filter(|m| m.serves(query.task.category))
            .filter(|m| m.accessible_to(query.plan))
            .collect();

        if eligible.is_empty() {
            debug!(
                category = query.task.category.as_str(),
                plan = ?query.plan,
                "No model satisfies optimization constraints"
            );
            return None;
        }

        let costs: Vec<f64> = eligible.iter().map(|m| query.task.estimate_cost(m)).collect();
        let min_cost = costs.iter().copied().fold(f64::INFINITY, f64::min);
        let (cost_weight, quality_weight) = Self::weights(query.quality);

        let mut scored: Vec<Scored<'_>> = eligible
            .iter()
            .zip(costs)
            .map(|(model, cost)| {
                let cost_score = if cost <= 0.0 { 1.0 } else { min_cost / cost };
                let quality = self.quality_for(model, metrics.get(&model.id), query.task.complexity);
                Scored {
                    model,
                    cost,
                    quality,
                    score: cost_weight * cost_score + quality_weight * quality,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.model.id.cmp(&b.model.id))
        });

        let best = &scored[0];
        let best_score = best.score;
        let alternatives: Vec<ModelAlternative> = scored
            .iter()
            .skip(1)
            .take(self.config.max_alternatives)
            .map(|s| ModelAlternative {
                model_id: s.model.id.clone(),
                provider: s.model.provider.clone(),
                estimated_cost: s.cost,
                quality_score: s.quality,
                score: s.score,
                label: self.label(s.score, best_score),
            })
            .collect();

        let potential_savings = query
            .current_model
            .as_deref()
            .and_then(|id| registry.get(id))
            .map(|current| (query.task.estimate_cost(&current) - best.cost).max(0.0))
            .unwrap_or(0.0);

        let reasoning = format!(
            "{} ranks first of {} eligible models for a {:?} {} task with {:?} preference: \
             estimated ${:.4}, quality {:.2}, score {:.3}",
            best.model.id,
            scored.len(),
            query.task.complexity,
            query.task.category.as_str(),
            query.quality,
            best.cost,
            best.quality,
            best.score
        );

        Some(OptimizationResult {
            recommended_model: best.model.id.clone(),
            provider: best.model.provider.clone(),
            estimated_cost: best.cost,
            quality_score: best.quality,
            reasoning,
            alternatives,
            potential_savings,
            budget_impact: self.budget_impact(best.cost),
        })
    }

    fn quality_for(
        &self,
        model: &ModelDescriptor,
        observed: Option<&PerformanceMetrics>,
        complexity: TaskComplexity,
    ) -> f64 {
        let mut quality = model.quality_score;

        if let Some(metrics) = observed {
            if metrics.total_requests >= self.config.min_observations {
                let w = self.config.observed_quality_weight;
                quality = (1.0 - w) * quality + w * metrics.success_rate;
            }
        }

        match complexity {
            TaskComplexity::Complex if quality < 0.7 => quality * 0.7,
            TaskComplexity::Moderate if quality < 0.5 => quality * 0.85,
            _ => quality,
        }
    }

    fn label(&self, score: f64, best: f64) -> Suitability {
        let ratio = if best > 0.0 { score / best } else { 1.0 };
        if ratio >= self.config.recommended_ratio {
            Suitability::Recommended
        } else if ratio >= self.config.acceptable_ratio {
            Suitability::Acceptable
        } else {
            Suitability::NotRecommended
        }
    }

    pub fn budget_impact(&self, cost: f64) -> BudgetImpact {
        if cost < self.config.low_budget_below {
            BudgetImpact::Low
        } else if cost < self.config.medium_budget_below {
            BudgetImpact::Medium
        } else {
            BudgetImpact::High
        }
    }
}
