//! Periodic housekeeping: stale rate-limit windows, expired cache entries,
//! analytics retention and optional registry refresh.

use crate::dispatcher::Router;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the background tasks; dropping it stops them.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Stop every task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Maintenance task ended abnormally: {}", e);
                }
            }
        }
        info!("Maintenance stopped");
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(task = name, interval_secs = every.as_secs(), "Maintenance task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        debug!(task = name, "Maintenance task stopped");
    })
}

impl Router {
    /// Start the housekeeping tasks configured in `maintenance`. Intervals
    /// of zero are skipped; registry refresh also needs a registry source.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let config = &self.config.maintenance;

        if config.rate_limit_sweep_secs > 0 {
            let limiter = self.rate_limiter.clone();
            let cache = self.cache.clone();
            tasks.push(spawn_periodic(
                "rate_limit_sweep",
                Duration::from_secs(config.rate_limit_sweep_secs),
                cancel.clone(),
                move || {
                    let limiter = limiter.clone();
                    let cache = cache.clone();
                    async move {
                        let windows = limiter.sweep_stale();
                        let entries = cache.purge_expired();
                        if windows + entries > 0 {
                            debug!(windows, entries, "Swept stale state");
                        }
                    }
                },
            ));
        }

        if config.analytics_cleanup_secs > 0 {
            let analytics = self.analytics.clone();
            tasks.push(spawn_periodic(
                "analytics_cleanup",
                Duration::from_secs(config.analytics_cleanup_secs),
                cancel.clone(),
                move || {
                    let analytics = analytics.clone();
                    async move {
                        analytics.cleanup();
                    }
                },
            ));
        }

        if config.registry_refresh_secs > 0 {
            match &self.registry_source {
                Some(source) => {
                    let source = source.clone();
                    let registry = self.registry.clone();
                    tasks.push(spawn_periodic(
                        "registry_refresh",
                        Duration::from_secs(config.registry_refresh_secs),
                        cancel.clone(),
                        move || {
                            let source = source.clone();
                            let registry = registry.clone();
                            async move {
                                // Failures keep the previous snapshot.
                                let _ = registry.refresh_from(source.as_ref()).await;
                            }
                        },
                    ));
                }
                None => debug!("Registry refresh configured without a source"),
            }
        }

        info!(tasks = tasks.len(), "Maintenance started");
        MaintenanceHandle { cancel, tasks }
    }
}
