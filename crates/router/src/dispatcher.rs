//! Router/Dispatcher: admission, candidate resolution and ordered fallback
//! across providers.
//!
//! One dispatch runs these steps in order and stops at the first failure:
//!
//! 1. rate limit (`Throttled`)
//! 2. content validation (`InvalidRequest`)
//! 3. plan resolution and candidate ordering (`AccessDenied`, `ModelNotFound`)
//! 4. response cache lookup
//! 5. candidates, strictly one at a time, each bounded by the attempt timeout
//!
//! Nothing before step 5 touches a provider.

use crate::access::{PlanResolver, StaticPlanResolver};
use crate::cache::ResponseCache;
use crate::config::RouterConfig;
use crate::rate_limiter::RateLimiter;
use crate::validation::RequestValidator;
use common::{OperationTimer, RequestContext};
use llm::{
    AttemptFailure, ChunkStream, CompletionHook, CostOptimizer, GenerateError, GenerateRequest,
    GenerateResponse, HealthStatus, HealthTracker, ModelDescriptor, ModelRegistry,
    OptimizationQuery, OptimizationResult, PerformanceMetrics, PlanTier, ProviderAdapter,
    ProviderError, ProviderHealthRecord, ProviderReply, ProviderRequest, RegistrySource,
    ReportPeriod, RequestCategory, StreamAggregator, StreamContext, StreamSummary, TokenUsage,
    UsageAnalytics, UsageEvent, UsageReport,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How the candidate list was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    Explicit,
    Optimizer,
}

impl CandidateOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateOrigin::Explicit => "explicit",
            CandidateOrigin::Optimizer => "optimizer",
        }
    }
}

/// Ordered candidates for one request, already filtered by plan access.
#[derive(Debug, Clone)]
pub struct CandidatePlan {
    pub plan: PlanTier,
    pub origin: CandidateOrigin,
    pub candidates: Vec<Arc<ModelDescriptor>>,
}

impl CandidatePlan {
    pub fn model_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|m| m.id.clone()).collect()
    }
}

/// Admitted request ready for provider attempts.
struct Admission {
    context: RequestContext,
    plan: CandidatePlan,
    cache_key: Option<u64>,
}

/// Health and analytics feedback for provider attempts.
#[derive(Clone)]
struct OutcomeRecorder {
    health: Arc<HealthTracker>,
    analytics: Arc<UsageAnalytics>,
}

impl OutcomeRecorder {
    /// Returns the attempt's cost.
    fn record_success(
        &self,
        caller_id: &str,
        category: RequestCategory,
        model: &ModelDescriptor,
        elapsed_ms: u64,
        usage: TokenUsage,
        update_health: bool,
    ) -> f64 {
        let cost = model.cost.estimate(usage.input_tokens, usage.output_tokens);
        if update_health {
            self.health.record_outcome(&model.provider, elapsed_ms, true);
        }
        self.analytics.record(
            UsageEvent::new(caller_id, &model.id, &model.provider, category)
                .with_usage(usage)
                .with_response_time(elapsed_ms)
                .with_cost(cost),
        );
        cost
    }

    fn record_failure(
        &self,
        caller_id: &str,
        category: RequestCategory,
        model: &ModelDescriptor,
        elapsed_ms: u64,
        error: &ProviderError,
        update_health: bool,
    ) {
        if update_health {
            self.health.record_outcome(&model.provider, elapsed_ms, false);
        }
        self.analytics.record(
            UsageEvent::new(caller_id, &model.id, &model.provider, category)
                .with_response_time(elapsed_ms)
                .failed(error.kind),
        );
    }

    fn stream_hook(
        &self,
        caller_id: &str,
        category: RequestCategory,
        model: Arc<ModelDescriptor>,
    ) -> CompletionHook {
        let recorder = self.clone();
        let caller_id = caller_id.to_string();
        Box::new(move |summary: StreamSummary| {
            match &summary.error {
                Some(error) => recorder.record_failure(
                    &caller_id,
                    category,
                    &model,
                    summary.elapsed_ms,
                    error,
                    true,
                ),
                // A consumer cancelling says nothing about the provider.
                None => {
                    recorder.record_success(
                        &caller_id,
                        category,
                        &model,
                        summary.elapsed_ms,
                        summary.usage,
                        !summary.cancelled,
                    );
                }
            }
        })
    }
}

/// One successful provider call, before it is shaped for the caller.
enum AttemptSuccess {
    Reply(ProviderReply),
    Stream(ChunkStream),
}

struct Winner {
    /// Position in the candidate list
    index: usize,
    model: Arc<ModelDescriptor>,
    success: AttemptSuccess,
    failures: Vec<AttemptFailure>,
    skipped: Vec<String>,
}

pub struct Router {
    pub(crate) config: RouterConfig,
    pub(crate) registry: Arc<ModelRegistry>,
    pub(crate) health: Arc<HealthTracker>,
    pub(crate) analytics: Arc<UsageAnalytics>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) registry_source: Option<Arc<dyn RegistrySource>>,
    optimizer: CostOptimizer,
    validator: RequestValidator,
    plans: Arc<dyn PlanResolver>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    aggregator: StreamAggregator,
    recorder: OutcomeRecorder,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Non-streaming generation with ordered fallback.
    pub async fn dispatch(&self, request: GenerateRequest) -> Result<GenerateResponse, GenerateError> {
        let mut timer = OperationTimer::new("dispatch");
        timer.add_field("caller", &request.caller_id);

        let result = self.dispatch_inner(&request, &mut timer).await;
        timer.finish_with_result(&result);
        result
    }

    async fn dispatch_inner(
        &self,
        request: &GenerateRequest,
        timer: &mut OperationTimer,
    ) -> Result<GenerateResponse, GenerateError> {
        let admission = self.admit(request).await?;
        timer.add_field("request_id", &admission.context.request_id);

        if let Some(key) = admission.cache_key {
            if let Some(hit) = self.cache.get(key) {
                debug!(
                    request_id = %admission.context.request_id,
                    model = %hit.model_used,
                    "Serving cached response"
                );
                return Ok(self.cached_response(request, &admission, hit));
            }
        }

        let started = Instant::now();
        let Winner {
            index,
            model,
            success,
            failures,
            skipped,
        } = self.run_candidates(request, &admission, false).await?;

        let reply = match success {
            AttemptSuccess::Reply(reply) => reply,
            AttemptSuccess::Stream(_) => {
                return Err(GenerateError::Internal(
                    "stream returned for a non-streaming dispatch".to_string(),
                ))
            }
        };

        let usage = reply.usage.unwrap_or_else(|| {
            TokenUsage::estimated(request.input_chars(), reply.text.chars().count())
        });
        let estimated_cost = model.cost.estimate(usage.input_tokens, usage.output_tokens);
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let mut metadata = self.response_metadata(request, &admission, &failures, &skipped);
        if let Some(reason) = &reply.finish_reason {
            metadata.insert("finish_reason".to_string(), Value::from(reason.clone()));
        }

        let response = GenerateResponse {
            text: reply.text,
            model_used: model.id.clone(),
            provider_used: model.provider.clone(),
            usage,
            estimated_cost,
            processing_time_ms,
            fallbacks_attempted: index,
            cache_hit: false,
            metadata,
        };

        timer.add_field("total_tokens", usage.total_tokens);
        timer.add_field("cost_usd", estimated_cost);
        timer.add_field("fallbacks_attempted", index);

        info!(
            request_id = %admission.context.request_id,
            caller = %request.caller_id,
            model = %response.model_used,
            provider = %response.provider_used,
            duration_ms = processing_time_ms,
            total_tokens = usage.total_tokens,
            cost_usd = estimated_cost,
            fallbacks_attempted = index,
            "Dispatch completed"
        );

        if let Some(key) = admission.cache_key {
            self.cache.insert(key, &response);
        }
        Ok(response)
    }

    /// Streaming generation.
    ///
    /// Failures before any candidate opens a stream come back as `Err`;
    /// once a stream is returned, later failures arrive as the terminal
    /// chunk's error.
    pub async fn dispatch_stream(&self, request: GenerateRequest) -> Result<ChunkStream, GenerateError> {
        let admission = self.admit(&request).await?;

        if let Some(key) = admission.cache_key {
            if let Some(hit) = self.cache.get(key) {
                let hit = self.cached_response(&request, &admission, hit);
                let mut context =
                    StreamContext::new(&hit.model_used, &hit.provider_used, request.input_chars());
                context.metadata = hit.metadata;
                context = context
                    .with_metadata("cache_hit", true)
                    .with_metadata("fallbacks_attempted", hit.fallbacks_attempted);
                return Ok(self.aggregator.replay(&hit.text, context, hit.usage));
            }
        }

        let Winner {
            index,
            model,
            success,
            ..
        } = self.run_candidates(&request, &admission, true).await?;

        info!(
            request_id = %admission.context.request_id,
            caller = %request.caller_id,
            model = %model.id,
            provider = %model.provider,
            fallbacks_attempted = index,
            "Stream opened"
        );

        match success {
            AttemptSuccess::Stream(stream) => Ok(stream),
            AttemptSuccess::Reply(_) => Err(GenerateError::Internal(
                "reply returned for a streaming dispatch".to_string(),
            )),
        }
    }

    /// Streaming generation that always yields a well-formed stream; an
    /// admission or fallback failure becomes a single terminal error chunk.
    pub async fn generate_stream(&self, request: GenerateRequest) -> ChunkStream {
        let model_id = request.model.clone().unwrap_or_default();
        match self.dispatch_stream(request).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(model = %model_id, error = %error, "Stream dispatch failed");
                StreamAggregator::failed(&model_id, &error)
            }
        }
    }

    async fn admit(&self, request: &GenerateRequest) -> Result<Admission, GenerateError> {
        let context = RequestContext::new()
            .with_caller(&request.caller_id)
            .with_session(&request.session_id);

        if !self.rate_limiter.allow(&request.caller_id) {
            let retry_after = self.rate_limiter.retry_after(&request.caller_id);
            return Err(GenerateError::Throttled {
                caller_id: request.caller_id.clone(),
                retry_after_secs: retry_after.as_secs_f64().ceil() as u64,
            });
        }

        self.validator.validate(request)?;

        let plan = self.plans.resolve_plan(&request.caller_id).await?;
        let plan = self.resolve_candidates(request, plan)?;

        debug!(
            request_id = %context.request_id,
            caller = %request.caller_id,
            origin = plan.origin.as_str(),
            candidates = ?plan.model_ids(),
            input_chars = request.input_chars(),
            "Request admitted"
        );

        Ok(Admission {
            context,
            cache_key: self.cache.key_for(request),
            plan,
        })
    }

    /// Candidate ordering for a request, filtered to what `plan` may use.
    pub fn resolve_candidates(
        &self,
        request: &GenerateRequest,
        plan: PlanTier,
    ) -> Result<CandidatePlan, GenerateError> {
        let snapshot = self.registry.snapshot();

        let (origin, ids) = match &request.model {
            Some(model) => {
                let ids = std::iter::once(model.clone())
                    .chain(request.fallback_models.iter().cloned())
                    .collect::<Vec<_>>();
                (CandidateOrigin::Explicit, ids)
            }
            None => {
                let metrics = self
                    .analytics
                    .metrics_snapshot(self.config.dispatch.metrics_window_hours);
                let query = OptimizationQuery::for_request(request, plan);
                match self.optimizer.optimize(&snapshot, &metrics, &query) {
                    Some(result) => {
                        let ids = result
                            .candidate_order()
                            .into_iter()
                            .chain(request.fallback_models.iter().cloned())
                            .collect::<Vec<_>>();
                        (CandidateOrigin::Optimizer, ids)
                    }
                    None => {
                        let unrestricted = OptimizationQuery {
                            plan: PlanTier::Enterprise,
                            ..query
                        };
                        if self.optimizer.optimize(&snapshot, &metrics, &unrestricted).is_some() {
                            return Err(GenerateError::AccessDenied(format!(
                                "plan {:?} has no model for {} requests",
                                plan,
                                request.category.as_str()
                            )));
                        }
                        return Err(GenerateError::ModelNotFound(format!(
                            "no registered model serves {} requests",
                            request.category.as_str()
                        )));
                    }
                }
            }
        };

        let mut seen = HashSet::new();
        let known: Vec<Arc<ModelDescriptor>> = ids
            .iter()
            .filter(|id| seen.insert(id.to_string()))
            .filter_map(|id| {
                let model = snapshot.get(id);
                if model.is_none() {
                    debug!(model = %id, "Dropping unknown candidate");
                }
                model
            })
            .collect();

        if known.is_empty() {
            return Err(GenerateError::ModelNotFound(ids.join(", ")));
        }

        let candidates: Vec<Arc<ModelDescriptor>> = known
            .iter()
            .filter(|m| m.accessible_to(plan))
            .cloned()
            .collect();

        if candidates.is_empty() {
            let names = known.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
            return Err(GenerateError::AccessDenied(format!(
                "plan {:?} cannot use {}",
                plan,
                names.join(", ")
            )));
        }

        Ok(CandidatePlan {
            plan,
            origin,
            candidates,
        })
    }

    /// Try candidates in order until one succeeds.
    ///
    /// Providers reported down are skipped unless they are the last
    /// candidate. Returns the winner's index in the candidate list.
    async fn run_candidates(
        &self,
        request: &GenerateRequest,
        admission: &Admission,
        streaming: bool,
    ) -> Result<Winner, GenerateError> {
        let candidates = &admission.plan.candidates;
        let last = candidates.len().saturating_sub(1);
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();

        for (index, model) in candidates.iter().enumerate() {
            if index < last && self.health.status(&model.provider) == HealthStatus::Down {
                debug!(
                    request_id = %admission.context.request_id,
                    provider = %model.provider,
                    model = %model.id,
                    "Skipping candidate on a down provider"
                );
                skipped.push(model.id.clone());
                continue;
            }

            let started = Instant::now();
            let outcome = if streaming {
                self.attempt_stream(request, admission, model, index, &failures)
                    .await
                    .map(AttemptSuccess::Stream)
            } else {
                self.attempt(request, model).await.map(AttemptSuccess::Reply)
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(success) => {
                    if let AttemptSuccess::Reply(reply) = &success {
                        let usage = reply.usage.unwrap_or_else(|| {
                            TokenUsage::estimated(request.input_chars(), reply.text.chars().count())
                        });
                        self.recorder.record_success(
                            &request.caller_id,
                            request.category,
                            model,
                            elapsed_ms,
                            usage,
                            true,
                        );
                    }
                    return Ok(Winner {
                        index,
                        model: model.clone(),
                        success,
                        failures,
                        skipped,
                    });
                }
                Err((error, adapter_called)) => {
                    warn!(
                        request_id = %admission.context.request_id,
                        provider = %model.provider,
                        model = %model.id,
                        attempt = index + 1,
                        error = %error,
                        "Candidate failed"
                    );
                    self.recorder.record_failure(
                        &request.caller_id,
                        request.category,
                        model,
                        elapsed_ms,
                        &error,
                        adapter_called,
                    );
                    failures.push(AttemptFailure {
                        model_id: model.id.clone(),
                        provider: model.provider.clone(),
                        kind: error.kind,
                        message: error.message.clone(),
                        elapsed_ms,
                    });
                }
            }
        }

        let error = GenerateError::exhausted(failures);
        warn!(
            request_id = %admission.context.request_id,
            caller = %request.caller_id,
            classification = error.classification().as_str(),
            "All candidates failed"
        );
        Err(error)
    }

    fn adapter_for(&self, model: &ModelDescriptor) -> Result<&Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters.get(&model.provider).ok_or_else(|| {
            ProviderError::unavailable(format!("no adapter registered for provider {}", model.provider))
        })
    }

    fn timeout_error(&self, model: &ModelDescriptor) -> ProviderError {
        ProviderError::timeout(format!(
            "{} did not answer within {}ms",
            model.id, self.config.dispatch.attempt_timeout_ms
        ))
    }

    /// The error side carries whether the adapter was actually invoked.
    async fn attempt(
        &self,
        request: &GenerateRequest,
        model: &ModelDescriptor,
    ) -> Result<ProviderReply, (ProviderError, bool)> {
        let adapter = self.adapter_for(model).map_err(|e| (e, false))?;
        let provider_request = ProviderRequest::for_model(request, &model.id);

        match tokio::time::timeout(
            self.config.dispatch.attempt_timeout(),
            adapter.execute(provider_request),
        )
        .await
        {
            Ok(result) => result.map_err(|e| (e, true)),
            Err(_) => Err((self.timeout_error(model), true)),
        }
    }

    async fn attempt_stream(
        &self,
        request: &GenerateRequest,
        admission: &Admission,
        model: &Arc<ModelDescriptor>,
        index: usize,
        failures: &[AttemptFailure],
    ) -> Result<ChunkStream, (ProviderError, bool)> {
        let adapter = self.adapter_for(model).map_err(|e| (e, false))?;
        let provider_request = ProviderRequest::for_model(request, &model.id);
        let native = adapter.capabilities(&model.id).supports_streaming && model.capabilities.streaming;

        let mut context = StreamContext::new(&model.id, &model.provider, request.input_chars())
            .with_metadata("fallbacks_attempted", index)
            .with_metadata("cache_hit", false);
        for (key, value) in self.response_metadata(request, admission, failures, &[]) {
            context.metadata.insert(key, value);
        }

        if native {
            let events = match tokio::time::timeout(
                self.config.dispatch.attempt_timeout(),
                adapter.execute_stream(provider_request),
            )
            .await
            {
                Ok(result) => result.map_err(|e| (e, true))?,
                Err(_) => return Err((self.timeout_error(model), true)),
            };
            let hook = self
                .recorder
                .stream_hook(&request.caller_id, request.category, model.clone());
            return Ok(self.aggregator.relay(events, context, Some(hook)));
        }

        let reply = match tokio::time::timeout(
            self.config.dispatch.attempt_timeout(),
            adapter.execute(provider_request),
        )
        .await
        {
            Ok(result) => result.map_err(|e| (e, true))?,
            Err(_) => return Err((self.timeout_error(model), true)),
        };

        let usage = reply.usage.unwrap_or_else(|| {
            TokenUsage::estimated(request.input_chars(), reply.text.chars().count())
        });
        self.recorder.record_success(
            &request.caller_id,
            request.category,
            model,
            context.started.elapsed().as_millis() as u64,
            usage,
            true,
        );
        Ok(self.aggregator.simulate(reply, context, None))
    }

    /// Cached entries are shared across callers; only the generated content
    /// is reused, the per-request metadata comes from the current request.
    fn cached_response(
        &self,
        request: &GenerateRequest,
        admission: &Admission,
        mut hit: GenerateResponse,
    ) -> GenerateResponse {
        let mut metadata = self.response_metadata(request, admission, &[], &[]);
        if let Some(reason) = hit.metadata.remove("finish_reason") {
            metadata.insert("finish_reason".to_string(), reason);
        }
        hit.metadata = metadata;
        hit.cache_hit = true;
        hit
    }

    fn response_metadata(
        &self,
        request: &GenerateRequest,
        admission: &Admission,
        failures: &[AttemptFailure],
        skipped: &[String],
    ) -> HashMap<String, Value> {
        let mut metadata = HashMap::new();
        metadata.insert(
            "mode".to_string(),
            Value::from(request.resolved_mode().as_str()),
        );
        metadata.insert(
            "session_id".to_string(),
            Value::from(request.session_id.clone()),
        );
        metadata.insert("token_budget".to_string(), Value::from(request.token_budget()));
        metadata.insert(
            "origin".to_string(),
            Value::from(admission.plan.origin.as_str()),
        );
        metadata.insert(
            "request_id".to_string(),
            Value::from(admission.context.request_id.clone()),
        );
        metadata.insert(
            "failed_attempts".to_string(),
            serde_json::to_value(failures).unwrap_or(Value::Null),
        );
        if !skipped.is_empty() {
            metadata.insert("skipped_down".to_string(), Value::from(skipped.to_vec()));
        }
        metadata
    }

    pub fn health_snapshot(&self) -> BTreeMap<String, ProviderHealthRecord> {
        self.health.snapshot()
    }

    pub fn health_status_map(&self) -> BTreeMap<String, HealthStatus> {
        self.health
            .snapshot()
            .into_iter()
            .map(|(provider, record)| (provider, record.status))
            .collect()
    }

    pub fn metrics(&self, model_id: &str, window_hours: u64) -> PerformanceMetrics {
        self.analytics.metrics_for(model_id, window_hours)
    }

    /// Optimizer output for an arbitrary task; no side effects beyond the
    /// metrics cache.
    pub fn recommendations(&self, query: &OptimizationQuery) -> Option<OptimizationResult> {
        let metrics = self
            .analytics
            .metrics_snapshot(self.config.dispatch.metrics_window_hours);
        self.optimizer
            .optimize(&self.registry.snapshot(), &metrics, query)
    }

    /// Recommendation for a concrete request under the caller's plan.
    pub async fn recommend_for(&self, request: &GenerateRequest) -> Result<OptimizationResult, GenerateError> {
        let plan = self.plans.resolve_plan(&request.caller_id).await?;
        self.recommendations(&OptimizationQuery::for_request(request, plan))
            .ok_or_else(|| {
                GenerateError::ModelNotFound(format!(
                    "no model available to plan {:?} for {} requests",
                    plan,
                    request.category.as_str()
                ))
            })
    }

    pub fn report(&self, period: ReportPeriod) -> UsageReport {
        self.analytics.report(period)
    }

    /// Reload the catalog from the configured source, if any.
    pub async fn refresh_registry(&self) -> Result<usize, ProviderError> {
        match &self.registry_source {
            Some(source) => self.registry.refresh_from(source.as_ref()).await,
            None => Ok(self.registry.snapshot().len()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn analytics(&self) -> &Arc<UsageAnalytics> {
        &self.analytics
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.adapters.keys().cloned().collect();
        providers.sort();
        providers
    }
}

pub struct RouterBuilder {
    config: RouterConfig,
    registry: Option<Arc<ModelRegistry>>,
    models: Vec<ModelDescriptor>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    plans: Option<Arc<dyn PlanResolver>>,
    registry_source: Option<Arc<dyn RegistrySource>>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
            registry: None,
            models: Vec::new(),
            adapters: HashMap::new(),
            plans: None,
            registry_source: None,
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing registry instead of building one.
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models.extend(models);
        self
    }

    /// Register an adapter under its `provider_id()`; a later adapter for
    /// the same provider replaces the earlier one.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters
            .insert(adapter.provider_id().to_string(), adapter);
        self
    }

    pub fn with_plan_resolver(mut self, plans: Arc<dyn PlanResolver>) -> Self {
        self.plans = Some(plans);
        self
    }

    pub fn with_registry_source(mut self, source: Arc<dyn RegistrySource>) -> Self {
        self.registry_source = Some(source);
        self
    }

    pub fn build(self) -> anyhow::Result<Router> {
        self.config.validate()?;

        let registry = match self.registry {
            Some(registry) => {
                for model in self.models {
                    registry.upsert(model);
                }
                registry
            }
            None => Arc::new(ModelRegistry::with_models(self.models)),
        };

        let snapshot = registry.snapshot();
        for model in snapshot.iter() {
            if !self.adapters.contains_key(&model.provider) {
                warn!(
                    model = %model.id,
                    provider = %model.provider,
                    "Model has no adapter for its provider"
                );
            }
        }

        let health = Arc::new(HealthTracker::new(self.config.health.clone()));
        let analytics = Arc::new(UsageAnalytics::new(self.config.analytics.clone()));

        info!(
            models = snapshot.len(),
            providers = self.adapters.len(),
            "Router initialised"
        );

        Ok(Router {
            rate_limiter: Arc::new(RateLimiter::new(self.config.rate_limit.clone())),
            cache: Arc::new(ResponseCache::new(self.config.cache.clone())),
            optimizer: CostOptimizer::new(self.config.optimizer.clone()),
            validator: RequestValidator::new(&self.config.validation),
            aggregator: StreamAggregator::new(self.config.dispatch.stream_chunk_words)
                .with_idle_timeout(self.config.dispatch.attempt_timeout()),
            plans: self
                .plans
                .unwrap_or_else(|| Arc::new(StaticPlanResolver::default())),
            recorder: OutcomeRecorder {
                health: health.clone(),
                analytics: analytics.clone(),
            },
            adapters: self.adapters,
            registry_source: self.registry_source,
            registry,
            health,
            analytics,
            config: self.config,
        })
    }
}
