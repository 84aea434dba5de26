//! RetryExecutor (C8): the hardest component per spec. Classifies every
//! backend failure, retries with exponential backoff + jitter, and walks
//! a fallback chain when retries are exhausted (§4.8).

pub mod backoff;
pub mod classify;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{ExponentialRandomBackoff, IntervalFunction};
use gateway_core::model::RequestStatus;
use gateway_core::{Backend, BackendOutput, FailureClass};
use gateway_health::HealthChecker;
use gateway_reliability::ReliabilityTracker;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_s: f64,
    pub rate_limit_base_delay_s: f64,
    pub max_delay_s: f64,
    pub fallback_enabled: bool,
    pub fallback_chains: HashMap<String, Vec<String>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_s: 0.5,
            rate_limit_base_delay_s: 2.0,
            max_delay_s: 30.0,
            fallback_enabled: true,
            fallback_chains: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    pub attempt: u32,
    pub classification: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RetrySummary {
    pub attempts: Vec<AttemptRecord>,
    pub providers_tried: Vec<String>,
}

pub struct RetryExecutor {
    config: RetryConfig,
    health: Option<Arc<HealthChecker>>,
    reliability: Arc<ReliabilityTracker>,
}

impl RetryExecutor {
    pub fn new(
        config: RetryConfig,
        health: Option<Arc<HealthChecker>>,
        reliability: Arc<ReliabilityTracker>,
    ) -> Self {
        Self {
            config,
            health,
            reliability,
        }
    }

    fn backoff_for(&self, classification: &FailureClass) -> ExponentialRandomBackoff {
        let base = match classification {
            FailureClass::RetryableRateLimit(_) => self.config.rate_limit_base_delay_s,
            _ => self.config.base_delay_s,
        };
        ExponentialRandomBackoff::new(
            Duration::from_secs_f64(base),
            Duration::from_secs_f64(self.config.max_delay_s),
        )
    }

    async fn is_eligible(&self, provider: &str) -> bool {
        let healthy = match &self.health {
            Some(h) => h.is_available(provider).await,
            None => true,
        };
        healthy && !self.reliability.needs_reauth(provider).await
    }

    /// Executes `backend.call(message)`, retrying per classification and
    /// falling back through `fallback_chains[provider]` on exhaustion.
    /// `timeout_s` bounds each individual attempt, not the loop as a whole
    /// (P1). `on_transition` is invoked synchronously for every status the
    /// request passes through so callers can persist it; failures in that
    /// callback are the caller's problem, not ours.
    pub async fn execute(
        &self,
        provider: &str,
        backends: &HashMap<String, Arc<dyn Backend>>,
        message: &str,
        timeout_s: u64,
        on_transition: &(dyn Fn(RequestStatus) + Send + Sync),
    ) -> (Result<BackendOutput, FailureClass>, RetrySummary) {
        let mut summary = RetrySummary::default();
        let mut current_provider = provider.to_string();
        let call_timeout = Duration::from_secs(timeout_s.max(1));

        loop {
            summary.providers_tried.push(current_provider.clone());
            on_transition(RequestStatus::Processing);
            let Some(backend) = backends.get(&current_provider) else {
                let err = FailureClass::NonRetryablePermanent(format!(
                    "no backend registered for provider {current_provider}"
                ));
                return (Err(err), summary);
            };

            let mut attempt = 0u32;
            loop {
                let start = Instant::now();
                let result = match tokio::time::timeout(call_timeout, backend.call(message)).await {
                    Ok(r) => r,
                    Err(_) => Err(FailureClass::RetryableTransient(format!(
                        "call to {current_provider} exceeded {timeout_s}s timeout"
                    ))),
                };
                let elapsed_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(output) => {
                        summary.attempts.push(AttemptRecord {
                            provider: current_provider.clone(),
                            attempt,
                            classification: None,
                            elapsed_ms,
                        });
                        self.reliability.record_success(&current_provider).await;
                        return (Ok(output), summary);
                    }
                    Err(classification) => {
                        summary.attempts.push(AttemptRecord {
                            provider: current_provider.clone(),
                            attempt,
                            classification: Some(classification.label().to_string()),
                            elapsed_ms,
                        });
                        self.reliability
                            .record_failure(&current_provider, &classification.to_string())
                            .await;

                        if classification.is_retryable() && attempt < self.config.max_retries {
                            on_transition(RequestStatus::Retrying);
                            let delay = self.backoff_for(&classification).next_interval(attempt as usize);
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            on_transition(RequestStatus::Processing);
                            continue;
                        }

                        // Retries exhausted or non-retryable: try to fall
                        // back, otherwise fail with this classification.
                        if self.config.fallback_enabled {
                            if let Some(next) = self.next_fallback(&current_provider, &summary).await {
                                on_transition(RequestStatus::Fallback);
                                current_provider = next;
                                break;
                            }
                        }
                        return (Err(classification), summary);
                    }
                }
            }
        }
    }

    async fn next_fallback(&self, provider: &str, summary: &RetrySummary) -> Option<String> {
        let chain = self.config.fallback_chains.get(provider)?;
        for candidate in chain {
            if summary.providers_tried.contains(candidate) {
                continue;
            }
            if self.is_eligible(candidate).await {
                return Some(candidate.clone());
            }
        }
        warn!(provider, "no healthy fallback candidate left in chain");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::BackendResult;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyThenOk {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Backend for FlakyThenOk {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(FailureClass::RetryableTransient("timeout".into()))
            } else {
                Ok(BackendOutput {
                    content: "ok".into(),
                    input_tokens: 1,
                    output_tokens: 1,
                    latency_ms: 1,
                })
            }
        }
    }

    struct AlwaysAuthFail;
    #[async_trait]
    impl Backend for AlwaysAuthFail {
        fn name(&self) -> &str {
            "bad_auth"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            Err(FailureClass::NonRetryableAuth("401".into()))
        }
    }

    struct AlwaysOk;
    #[async_trait]
    impl Backend for AlwaysOk {
        fn name(&self) -> &str {
            "fallback_target"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            Ok(BackendOutput {
                content: "fallback ok".into(),
                input_tokens: 1,
                output_tokens: 1,
                latency_ms: 1,
            })
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_s: 0.001,
            rate_limit_base_delay_s: 0.001,
            max_delay_s: 0.01,
            fallback_enabled: true,
            fallback_chains: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert(
            "flaky".into(),
            Arc::new(FlakyThenOk {
                failures_before_success: 2,
                calls: AtomicU32::new(0),
            }),
        );
        let executor = RetryExecutor::new(fast_config(), None, Arc::new(ReliabilityTracker::new()));
        let (result, summary) = executor.execute("flaky", &backends, "hi", 5, &|_| {}).await;
        assert!(result.is_ok());
        assert_eq!(summary.attempts.len(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_never_retried() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("bad_auth".into(), Arc::new(AlwaysAuthFail));
        let executor = RetryExecutor::new(fast_config(), None, Arc::new(ReliabilityTracker::new()));
        let (result, summary) = executor.execute("bad_auth", &backends, "hi", 5, &|_| {}).await;
        assert!(result.is_err());
        assert_eq!(summary.attempts.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_in_chain() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("bad_auth".into(), Arc::new(AlwaysAuthFail));
        backends.insert("fallback_target".into(), Arc::new(AlwaysOk));
        let mut config = fast_config();
        config
            .fallback_chains
            .insert("bad_auth".into(), vec!["fallback_target".into()]);
        let executor = RetryExecutor::new(config, None, Arc::new(ReliabilityTracker::new()));
        let (result, summary) = executor.execute("bad_auth", &backends, "hi", 5, &|_| {}).await;
        assert!(result.is_ok());
        assert_eq!(summary.providers_tried, vec!["bad_auth".to_string(), "fallback_target".to_string()]);
        assert_eq!(summary.providers_tried.last().unwrap(), "fallback_target");
    }

    #[tokio::test]
    async fn on_transition_observes_fallback() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("bad_auth".into(), Arc::new(AlwaysAuthFail));
        backends.insert("fallback_target".into(), Arc::new(AlwaysOk));
        let mut config = fast_config();
        config
            .fallback_chains
            .insert("bad_auth".into(), vec!["fallback_target".into()]);
        let executor = RetryExecutor::new(config, None, Arc::new(ReliabilityTracker::new()));
        let seen = std::sync::Mutex::new(Vec::new());
        let (result, _summary) = executor
            .execute("bad_auth", &backends, "hi", 5, &|s| seen.lock().unwrap().push(s))
            .await;
        assert!(result.is_ok());
        let seen = seen.into_inner().unwrap();
        assert!(seen.contains(&RequestStatus::Fallback));
    }
}
