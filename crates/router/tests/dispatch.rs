mod support;

use futures::StreamExt;
use llm::{
    ErrorKind, HealthStatus, Mode, ModelDescriptor, PlanTier, ProviderErrorKind, QualityPreference,
};
use router::{RouterConfig, StaticPlanResolver};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use support::{chain_models, router_with, user_request, MockAdapter};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_thirty_first_request_in_window_is_throttled() {
    let adapter = MockAdapter::new("provider-a").shared();
    let router = router_with(chain_models(), vec![adapter.clone()], RouterConfig::default());

    for _ in 0..30 {
        assert_ok!(router.dispatch(user_request("alice", "hi").with_model("model-a")).await);
    }
    let err = assert_err!(router.dispatch(user_request("alice", "hi").with_model("model-a")).await);

    assert_eq!(err.kind(), ErrorKind::Throttled);
    assert!(err.is_pre_dispatch());
    assert_eq!(adapter.calls(), 30);

    // Other callers are unaffected.
    assert_ok!(router.dispatch(user_request("bob", "hi").with_model("model-a")).await);
}

#[tokio::test]
async fn test_throttling_ignores_outcome_of_earlier_requests() {
    let adapter = MockAdapter::failing("provider-a", ProviderErrorKind::Unavailable).shared();
    let router = router_with(chain_models(), vec![adapter.clone()], RouterConfig::default());

    for _ in 0..30 {
        let err = assert_err!(router.dispatch(user_request("alice", "hi").with_model("model-a")).await);
        assert_eq!(err.kind(), ErrorKind::AllCandidatesExhausted);
    }
    let err = assert_err!(router.dispatch(user_request("alice", "hi").with_model("model-a")).await);
    assert_eq!(err.kind(), ErrorKind::Throttled);
    assert_eq!(adapter.calls(), 30);
}

#[tokio::test]
async fn test_third_candidate_wins_after_two_failures() {
    let a = MockAdapter::failing("provider-a", ProviderErrorKind::Unavailable).shared();
    let b = MockAdapter::failing("provider-b", ProviderErrorKind::QuotaExceeded).shared();
    let c = MockAdapter::new("provider-c").with_reply("from c").shared();
    let router = router_with(
        chain_models(),
        vec![a.clone(), b.clone(), c.clone()],
        RouterConfig::default(),
    );

    let response = router
        .dispatch(
            user_request("alice", "hello")
                .with_model("model-a")
                .with_fallbacks(&["model-b", "model-c"]),
        )
        .await
        .unwrap();

    assert_eq!(response.fallbacks_attempted, 2);
    assert_eq!(response.provider_used, "provider-c");
    assert_eq!(response.model_used, "model-c");
    assert_eq!(response.text, "from c");
    assert!(!response.cache_hit);
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));

    let failed = response.metadata["failed_attempts"].as_array().unwrap();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0]["provider"], "provider-a");
    assert_eq!(failed[1]["kind"], "quota_exceeded");

    // Usage 10 in / 20 out on model-c pricing.
    let expected = 10.0 / 1000.0 * 0.003 + 20.0 / 1000.0 * 0.006;
    assert!((response.estimated_cost - expected).abs() < 1e-12);
}

#[rstest]
#[case(ProviderErrorKind::QuotaExceeded, ErrorKind::ProviderQuotaExceeded)]
#[case(ProviderErrorKind::AuthFailed, ErrorKind::ProviderAuthFailed)]
#[case(ProviderErrorKind::AccessDenied, ErrorKind::AccessDenied)]
#[case(ProviderErrorKind::NotFound, ErrorKind::ModelNotFound)]
#[case(ProviderErrorKind::Unavailable, ErrorKind::ProviderUnavailable)]
#[case(ProviderErrorKind::Timeout, ErrorKind::ProviderUnavailable)]
#[tokio::test]
async fn test_exhausted_chain_keeps_last_classification(
    #[case] last: ProviderErrorKind,
    #[case] expected: ErrorKind,
) {
    let router = router_with(
        chain_models(),
        vec![
            MockAdapter::failing("provider-a", ProviderErrorKind::AuthFailed).shared(),
            MockAdapter::failing("provider-b", ProviderErrorKind::Unavailable).shared(),
            MockAdapter::failing("provider-c", last).shared(),
        ],
        RouterConfig::default(),
    );

    let err = router
        .dispatch(
            user_request("alice", "hello")
                .with_model("model-a")
                .with_fallbacks(&["model-b", "model-c"]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AllCandidatesExhausted);
    assert_eq!(err.classification(), expected);
    let attempts = err.attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[2].model_id, "model-c");
    assert_eq!(attempts[2].kind, last);
}

#[tokio::test]
async fn test_free_plan_denied_premium_model_without_provider_call() {
    let adapter = MockAdapter::new("vision-co").shared();
    let router = router::Router::builder()
        .with_models(vec![ModelDescriptor::new("premium-vision-v2", "vision-co")
            .with_vision()
            .with_min_tier(PlanTier::Pro)])
        .with_adapter(adapter.clone())
        .with_plan_resolver(Arc::new(
            StaticPlanResolver::new(PlanTier::Free).with_plan("paying", PlanTier::Pro),
        ))
        .build()
        .unwrap();

    let err = router
        .dispatch(user_request("free-user", "describe this").with_model("premium-vision-v2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert!(err.is_pre_dispatch());
    assert_eq!(adapter.calls(), 0);
    assert!(router.health_snapshot().is_empty());
    assert!(router.analytics().is_empty());

    let response = router
        .dispatch(user_request("paying", "describe this").with_model("premium-vision-v2"))
        .await
        .unwrap();
    assert_eq!(response.provider_used, "vision-co");
}

#[tokio::test]
async fn test_inaccessible_candidates_are_filtered_before_dispatch() {
    let a = MockAdapter::new("provider-a").shared();
    let b = MockAdapter::new("provider-b").shared();
    let mut models = chain_models();
    models[0] = models[0].clone().with_min_tier(PlanTier::Enterprise);
    let router = router_with(models, vec![a.clone(), b.clone()], RouterConfig::default());

    let response = router
        .dispatch(
            user_request("alice", "hi")
                .with_model("model-a")
                .with_fallbacks(&["model-b"]),
        )
        .await
        .unwrap();

    assert_eq!(response.model_used, "model-b");
    assert_eq!(response.fallbacks_attempted, 0);
    assert_eq!(a.calls(), 0);
}

#[rstest]
#[case(Some(Mode::Flash), None, 1000)]
#[case(None, None, 2000)]
#[case(Some(Mode::FullThink), None, 3000)]
#[case(Some(Mode::UltraThink), None, 4000)]
#[case(Some(Mode::Flash), Some(777), 777)]
#[tokio::test]
async fn test_mode_budget_reaches_adapter(
    #[case] mode: Option<Mode>,
    #[case] max_tokens: Option<u32>,
    #[case] expected: u32,
) {
    let adapter = MockAdapter::new("provider-a").shared();
    let router = router_with(chain_models(), vec![adapter.clone()], RouterConfig::default());

    let mut request = user_request("alice", "hi").with_model("model-a");
    if let Some(mode) = mode {
        request = request.with_mode(mode);
    }
    if let Some(tokens) = max_tokens {
        request = request.with_max_tokens(tokens);
    }

    let response = router.dispatch(request).await.unwrap();
    assert_eq!(adapter.last_max_tokens(), expected);
    assert_eq!(response.metadata["token_budget"], expected);
}

#[rstest]
#[case(user_request("alice", "   "))]
#[case(user_request("", "hello"))]
#[case(user_request("alice", &"x".repeat(100_001)))]
#[tokio::test]
async fn test_invalid_input_never_reaches_a_provider(#[case] request: llm::GenerateRequest) {
    let adapter = MockAdapter::new("provider-a").shared();
    let router = router_with(chain_models(), vec![adapter.clone()], RouterConfig::default());

    let err = router.dispatch(request.with_model("model-a")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn test_denylisted_attachment_text_never_reaches_a_provider() {
    let adapter = MockAdapter::new("provider-a").shared();
    let mut config = RouterConfig::default();
    config.validation.denylist = vec!["forbidden".to_string()];
    let router = router_with(chain_models(), vec![adapter.clone()], config);

    let request = user_request("alice", "summarise the file")
        .with_model("model-a")
        .with_attachment(llm::Attachment::text("a.txt", "Forbidden content"));
    let err = router.dispatch(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let router = router_with(
        chain_models(),
        vec![MockAdapter::new("provider-a").shared()],
        RouterConfig::default(),
    );
    let err = router
        .dispatch(user_request("alice", "hi").with_model("gpt-17"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelNotFound);
}

#[tokio::test]
async fn test_down_provider_is_skipped_unless_last() {
    let a = MockAdapter::new("provider-a").shared();
    let b = MockAdapter::new("provider-b").shared();
    let router = router_with(chain_models(), vec![a.clone(), b.clone()], RouterConfig::default());

    for _ in 0..5 {
        router.health().record_outcome("provider-a", 100, false);
    }
    assert_eq!(router.health_status_map()["provider-a"], HealthStatus::Down);

    let response = router
        .dispatch(
            user_request("alice", "hi")
                .with_model("model-a")
                .with_fallbacks(&["model-b"]),
        )
        .await
        .unwrap();
    assert_eq!(response.provider_used, "provider-b");
    assert_eq!(response.fallbacks_attempted, 1);
    assert_eq!(response.metadata["skipped_down"][0], "model-a");
    assert_eq!(a.calls(), 0);

    // As the only candidate it is still tried.
    let response = router
        .dispatch(user_request("alice", "hi").with_model("model-a"))
        .await
        .unwrap();
    assert_eq!(response.provider_used, "provider-a");
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_candidate_times_out_and_falls_back() {
    let slow = MockAdapter::new("provider-a")
        .with_delay(Duration::from_secs(120))
        .shared();
    let fast = MockAdapter::new("provider-b").shared();
    let mut config = RouterConfig::default();
    config.dispatch.attempt_timeout_ms = 5_000;
    let router = router_with(chain_models(), vec![slow.clone(), fast.clone()], config);

    let response = router
        .dispatch(
            user_request("alice", "hi")
                .with_model("model-a")
                .with_fallbacks(&["model-b"]),
        )
        .await
        .unwrap();

    assert_eq!(response.provider_used, "provider-b");
    assert_eq!(response.fallbacks_attempted, 1);
    assert_eq!(response.metadata["failed_attempts"][0]["kind"], "timeout");
    assert_eq!(slow.calls(), 1);

    let record = router.health().record("provider-a").unwrap();
    assert_eq!(record.total_failures, 1);
}

#[tokio::test]
async fn test_provider_without_adapter_counts_as_unavailable() {
    let b = MockAdapter::new("provider-b").shared();
    let router = router_with(chain_models(), vec![b.clone()], RouterConfig::default());

    let response = router
        .dispatch(
            user_request("alice", "hi")
                .with_model("model-a")
                .with_fallbacks(&["model-b"]),
        )
        .await
        .unwrap();

    assert_eq!(response.provider_used, "provider-b");
    assert_eq!(response.metadata["failed_attempts"][0]["kind"], "unavailable");
    assert!(router.health().record("provider-a").is_none());
}

#[tokio::test]
async fn test_every_attempt_is_recorded_in_analytics_and_health() {
    let router = router_with(
        chain_models(),
        vec![
            MockAdapter::failing("provider-a", ProviderErrorKind::Unavailable).shared(),
            MockAdapter::new("provider-b").shared(),
        ],
        RouterConfig::default(),
    );

    router
        .dispatch(
            user_request("alice", "hi")
                .with_model("model-a")
                .with_fallbacks(&["model-b"]),
        )
        .await
        .unwrap();

    assert_eq!(router.analytics().len(), 2);
    let failed = router.metrics("model-a", 24);
    assert_eq!(failed.total_requests, 1);
    assert_eq!(failed.failed_requests, 1);
    let served = router.metrics("model-b", 24);
    assert_eq!(served.successful_requests, 1);
    assert!(served.total_cost > 0.0);

    let health = router.health_snapshot();
    assert_eq!(health["provider-a"].total_failures, 1);
    assert_eq!(health["provider-b"].total_requests, 1);
    assert_eq!(health["provider-b"].status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_optimizer_picks_candidates_when_no_model_is_named() {
    let cheap = MockAdapter::new("budget").shared();
    let pricey = MockAdapter::new("luxury").shared();
    let router = router::Router::builder()
        .with_models(vec![
            ModelDescriptor::new("budget-text", "budget")
                .with_cost(0.0001, 0.0002)
                .with_quality(0.6),
            ModelDescriptor::new("luxury-text", "luxury")
                .with_cost(0.03, 0.06)
                .with_quality(0.9),
        ])
        .with_adapter(cheap.clone())
        .with_adapter(pricey.clone())
        .build()
        .unwrap();

    let response = router
        .dispatch(user_request("alice", "short question").with_quality(QualityPreference::Economy))
        .await
        .unwrap();
    assert_eq!(response.model_used, "budget-text");
    assert_eq!(response.metadata["origin"], "optimizer");
    assert_eq!(pricey.calls(), 0);

    let recommendation = router
        .recommend_for(&user_request("alice", "short question").with_quality(QualityPreference::Economy))
        .await
        .unwrap();
    assert_eq!(recommendation.recommended_model, "budget-text");
    assert!(recommendation.potential_savings >= 0.0);
}

#[tokio::test]
async fn test_optimizer_falls_through_its_ranking() {
    let cheap = MockAdapter::failing("budget", ProviderErrorKind::QuotaExceeded).shared();
    let pricey = MockAdapter::new("luxury").shared();
    let router = router::Router::builder()
        .with_models(vec![
            ModelDescriptor::new("budget-text", "budget").with_cost(0.0001, 0.0002),
            ModelDescriptor::new("luxury-text", "luxury").with_cost(0.03, 0.06),
        ])
        .with_adapter(cheap.clone())
        .with_adapter(pricey.clone())
        .build()
        .unwrap();

    let response = router
        .dispatch(user_request("alice", "hi").with_quality(QualityPreference::Economy))
        .await
        .unwrap();
    assert_eq!(response.model_used, "luxury-text");
    assert_eq!(response.fallbacks_attempted, 1);
}

#[tokio::test]
async fn test_deterministic_requests_are_served_from_cache() {
    let adapter = MockAdapter::new("provider-a").shared();
    let mut config = RouterConfig::default();
    config.cache.enabled = true;
    let router = router_with(chain_models(), vec![adapter.clone()], config);

    let request = user_request("alice", "what is 2+2").with_model("model-a").with_temperature(0.0);
    let first = router.dispatch(request.clone()).await.unwrap();
    let second = router.dispatch(request).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.text, first.text);
    assert_eq!(adapter.calls(), 1);

    // Sampling requests bypass the cache.
    router
        .dispatch(user_request("alice", "what is 2+2").with_model("model-a"))
        .await
        .unwrap();
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn test_cache_hits_carry_the_current_callers_metadata() {
    let adapter = MockAdapter::new("provider-a").shared();
    let mut config = RouterConfig::default();
    config.cache.enabled = true;
    let router = router_with(chain_models(), vec![adapter.clone()], config);

    let alice = router
        .dispatch(
            user_request("alice", "hello")
                .with_model("model-a")
                .with_temperature(0.0)
                .with_session("alice-session"),
        )
        .await
        .unwrap();
    let bob = router
        .dispatch(
            user_request("bob", "hello")
                .with_model("model-a")
                .with_temperature(0.0)
                .with_session("bob-session"),
        )
        .await
        .unwrap();

    assert!(bob.cache_hit);
    assert_eq!(bob.text, alice.text);
    assert_eq!(adapter.calls(), 1);
    assert_eq!(bob.metadata["session_id"], "bob-session");
    assert_ne!(bob.metadata["request_id"], alice.metadata["request_id"]);
    assert_eq!(bob.metadata["origin"], "explicit");
    assert_eq!(bob.metadata["token_budget"], alice.metadata["token_budget"]);
    assert_eq!(bob.metadata["finish_reason"], alice.metadata["finish_reason"]);

    let chunks: Vec<llm::StreamChunk> = router
        .generate_stream(
            user_request("carol", "hello")
                .with_model("model-a")
                .with_temperature(0.0)
                .with_session("carol-session"),
        )
        .await
        .collect()
        .await;
    let terminal = chunks.last().unwrap();
    assert_eq!(terminal.metadata["cache_hit"], true);
    assert_eq!(terminal.metadata["session_id"], "carol-session");
    assert_ne!(terminal.metadata["request_id"], alice.metadata["request_id"]);
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_dispatches_share_state_safely() {
    let adapter = MockAdapter::new("provider-a").shared();
    let router = Arc::new(router_with(
        chain_models(),
        vec![adapter.clone()],
        RouterConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..40 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router
                .dispatch(user_request(&format!("caller-{}", i % 4), "hi").with_model("model-a"))
                .await
        }));
    }
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(adapter.calls(), 40);
    assert_eq!(router.analytics().len(), 40);
    assert_eq!(router.health_snapshot()["provider-a"].total_requests, 40);
}
