//! HealthChecker (C3): periodic probe of every registered backend, with
//! 3-failure/2-success hysteresis on status transitions (§3, §4.3), taken
//! verbatim from `original_source/lib/gateway/health_checker.py`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway_core::model::{ProviderHealth, ProviderStatus};
use gateway_core::Backend;
use tokio::sync::RwLock;
use tracing::{info, warn};

const FAILURE_THRESHOLD: u32 = 3;
const RECOVERY_THRESHOLD: u32 = 2;

/// Called whenever a provider's status changes, so the engine can
/// broadcast and the router can update availability. A no-op default
/// keeps call sites branch-free when nobody is listening (§9).
pub type StatusChangeCallback = Arc<dyn Fn(&str, ProviderStatus) + Send + Sync>;

pub struct HealthChecker {
    backends: HashMap<String, Arc<dyn Backend>>,
    health: RwLock<HashMap<String, ProviderHealth>>,
    check_timeout_s: u64,
    on_status_change: Option<StatusChangeCallback>,
}

impl HealthChecker {
    pub fn new(
        backends: HashMap<String, Arc<dyn Backend>>,
        check_timeout_s: u64,
        on_status_change: Option<StatusChangeCallback>,
    ) -> Self {
        let health = backends
            .keys()
            .map(|name| (name.clone(), ProviderHealth::new(name.clone())))
            .collect();
        Self {
            backends,
            health: RwLock::new(health),
            check_timeout_s,
            on_status_change,
        }
    }

    /// Runs the periodic probe loop at `check_interval_s` until cancelled.
    pub async fn run(self: Arc<Self>, check_interval_s: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(check_interval_s));
        loop {
            interval.tick().await;
            self.check_now(None).await;
        }
    }

    /// Probes one provider, or all registered providers if `None`.
    pub async fn check_now(&self, provider: Option<&str>) {
        let names: Vec<String> = match provider {
            Some(p) => vec![p.to_string()],
            None => self.backends.keys().cloned().collect(),
        };
        for name in names {
            let Some(backend) = self.backends.get(&name) else {
                continue;
            };
            let outcome = tokio::time::timeout(
                Duration::from_secs(self.check_timeout_s),
                backend.call("ping"),
            )
            .await;
            match outcome {
                Ok(Ok(_)) => self.record_success(&name).await,
                Ok(Err(e)) => self.record_failure(&name, &e.to_string()).await,
                Err(_) => self.record_failure(&name, "health check timed out").await,
            }
        }
    }

    pub async fn record_success(&self, provider: &str) {
        let mut health = self.health.write().await;
        let entry = health
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealth::new(provider));
        entry.consecutive_successes += 1;
        entry.consecutive_failures = 0;
        entry.last_check_at = Some(Utc::now());
        entry.last_error = None;
        let mut changed = None;
        if entry.consecutive_successes >= RECOVERY_THRESHOLD && entry.status != ProviderStatus::Healthy {
            entry.status = ProviderStatus::Healthy;
            entry.auto_disabled = false;
            changed = Some(entry.status);
        }
        drop(health);
        if let Some(status) = changed {
            info!(provider, ?status, "provider recovered");
            self.fire_callback(provider, status);
        }
    }

    pub async fn record_failure(&self, provider: &str, error: &str) {
        let mut health = self.health.write().await;
        let entry = health
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealth::new(provider));
        entry.consecutive_failures += 1;
        entry.consecutive_successes = 0;
        entry.last_check_at = Some(Utc::now());
        entry.last_error = Some(error.to_string());
        let mut changed = None;
        if entry.consecutive_failures >= FAILURE_THRESHOLD && entry.status != ProviderStatus::Unavailable {
            entry.status = ProviderStatus::Unavailable;
            entry.auto_disabled = true;
            changed = Some(entry.status);
        }
        drop(health);
        if let Some(status) = changed {
            warn!(provider, error, "provider marked unavailable");
            self.fire_callback(provider, status);
        }
    }

    fn fire_callback(&self, provider: &str, status: ProviderStatus) {
        if let Some(cb) = &self.on_status_change {
            cb(provider, status);
        }
    }

    pub async fn status(&self, provider: &str) -> Option<ProviderHealth> {
        self.health.read().await.get(provider).cloned()
    }

    pub async fn all_status(&self) -> Vec<ProviderHealth> {
        self.health.read().await.values().cloned().collect()
    }

    pub async fn force_disable(&self, provider: &str) {
        let mut health = self.health.write().await;
        if let Some(entry) = health.get_mut(provider) {
            entry.status = ProviderStatus::Unavailable;
            entry.auto_disabled = true;
        }
    }

    pub async fn force_enable(&self, provider: &str) {
        let mut health = self.health.write().await;
        if let Some(entry) = health.get_mut(provider) {
            entry.status = ProviderStatus::Healthy;
            entry.auto_disabled = false;
            entry.consecutive_failures = 0;
        }
    }

    pub async fn is_available(&self, provider: &str) -> bool {
        match self.health.read().await.get(provider) {
            Some(h) => !matches!(h.status, ProviderStatus::Unavailable),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{BackendOutput, BackendResult, FailureClass};
    use async_trait::async_trait;

    struct AlwaysFail;
    #[async_trait]
    impl Backend for AlwaysFail {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            Err(FailureClass::RetryableTransient("boom".into()))
        }
    }

    struct AlwaysOk;
    #[async_trait]
    impl Backend for AlwaysOk {
        fn name(&self) -> &str {
            "steady"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            Ok(BackendOutput {
                content: "pong".into(),
                input_tokens: 1,
                output_tokens: 1,
                latency_ms: 5,
            })
        }
    }

    #[tokio::test]
    async fn three_failures_marks_unavailable() {
        let checker = HealthChecker::new(HashMap::new(), 1, None);
        checker.record_failure("flaky", "e1").await;
        checker.record_failure("flaky", "e2").await;
        assert_ne!(
            checker.status("flaky").await.unwrap().status,
            ProviderStatus::Unavailable
        );
        checker.record_failure("flaky", "e3").await;
        let status = checker.status("flaky").await.unwrap();
        assert_eq!(status.status, ProviderStatus::Unavailable);
        assert!(status.auto_disabled);
    }

    #[tokio::test]
    async fn two_successes_after_failure_marks_healthy() {
        let checker = HealthChecker::new(HashMap::new(), 1, None);
        checker.record_failure("p", "e1").await;
        checker.record_failure("p", "e2").await;
        checker.record_failure("p", "e3").await;
        checker.record_success("p").await;
        checker.record_success("p").await;
        let status = checker.status("p").await.unwrap();
        assert_eq!(status.status, ProviderStatus::Healthy);
        assert!(!status.auto_disabled);
    }

    #[tokio::test]
    async fn status_change_callback_fires() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let checker = HealthChecker::new(
            HashMap::new(),
            1,
            Some(Arc::new(move |_p: &str, _s: ProviderStatus| {
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        );
        checker.record_failure("p", "e1").await;
        checker.record_failure("p", "e2").await;
        checker.record_failure("p", "e3").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn check_now_probes_registered_backend() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("steady".into(), Arc::new(AlwaysOk));
        backends.insert("flaky".into(), Arc::new(AlwaysFail));
        let checker = HealthChecker::new(backends, 1, None);
        checker.check_now(None).await;
        assert_eq!(checker.status("steady").await.unwrap().consecutive_successes, 1);
        assert_eq!(checker.status("flaky").await.unwrap().consecutive_failures, 1);
    }
}
