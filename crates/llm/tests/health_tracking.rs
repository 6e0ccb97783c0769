use llm::{HealthConfig, HealthStatus, HealthTracker};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_outcomes_are_all_counted() {
    let tracker = Arc::new(HealthTracker::default());
    let mut handles = Vec::new();

    for worker in 0..16 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            let provider = if worker % 2 == 0 { "openai" } else { "groq" };
            for _ in 0..50 {
                tracker.record_outcome(provider, 100, true);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot["openai"].total_requests, 400);
    assert_eq!(snapshot["groq"].total_requests, 400);
    assert_eq!(snapshot["openai"].status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_down_then_healthy_after_quiet_cooldown() {
    let tracker = HealthTracker::new(HealthConfig {
        consecutive_failures_for_down: 3,
        cooldown_secs: 10,
        ..Default::default()
    });

    for _ in 0..3 {
        tracker.record_outcome("anthropic", 200, false);
    }
    assert_eq!(tracker.snapshot()["anthropic"].status, HealthStatus::Down);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(tracker.snapshot()["anthropic"].status, HealthStatus::Healthy);

    // A fresh failure after recovery only degrades.
    assert_eq!(
        tracker.record_outcome("anthropic", 200, false),
        HealthStatus::Degraded
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_during_cooldown_restarts_it() {
    let tracker = HealthTracker::new(HealthConfig {
        consecutive_failures_for_down: 2,
        cooldown_secs: 10,
        ..Default::default()
    });

    tracker.record_outcome("local", 10, false);
    tracker.record_outcome("local", 10, false);
    tokio::time::advance(Duration::from_secs(8)).await;
    tracker.record_outcome("local", 10, false);
    tokio::time::advance(Duration::from_secs(8)).await;

    assert_eq!(tracker.status("local"), HealthStatus::Down);
    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(tracker.status("local"), HealthStatus::Healthy);
}
