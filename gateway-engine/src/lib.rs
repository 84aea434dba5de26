//! LifecycleEngine (C12): the background worker loop and the `AppContext`
//! that owns every other component, constructed once and passed down
//! instead of singletons (§4.12, §9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway_backpressure::Backpressure;
use gateway_cache::CacheManager;
use gateway_core::model::{BackendType, PricingRow, Request, RequestStatus, Response};
use gateway_core::{Backend, GatewayConfig, GatewayEvent, MemoryHooks};
use gateway_discussion::DiscussionOrchestrator;
use gateway_health::HealthChecker;
use gateway_metrics::MetricsCollector;
use gateway_parallel::ParallelExecutor;
use gateway_queue::RequestQueue;
use gateway_reliability::ReliabilityTracker;
use gateway_retry::RetryExecutor;
use gateway_router::Router;
use gateway_store::StateStore;
use gateway_stream::StreamManager;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything the engine and the HTTP surface both need. Constructed once
/// in `gateway-cli` and handed down by reference/`Arc` rather than relying
/// on process-wide singletons.
pub struct AppContext {
    pub config: GatewayConfig,
    pub store: Arc<dyn StateStore>,
    pub cache: Arc<CacheManager>,
    pub queue: Arc<RequestQueue>,
    pub health: Arc<HealthChecker>,
    pub backpressure: Arc<Backpressure>,
    pub reliability: Arc<ReliabilityTracker>,
    pub router: Arc<Router>,
    pub retry: Arc<RetryExecutor>,
    pub parallel: Arc<ParallelExecutor>,
    pub stream: Arc<StreamManager>,
    pub discussion: Arc<DiscussionOrchestrator>,
    pub metrics: Arc<MetricsCollector>,
    pub backends: HashMap<String, Arc<dyn Backend>>,
    pub memory_hooks: Option<Arc<dyn MemoryHooks>>,
    pub events: broadcast::Sender<GatewayEvent>,
}

impl AppContext {
    /// Broadcasts an event, swallowing the "no subscribers" error — per
    /// §5/§9, broadcast failures must never alter request status.
    pub fn broadcast(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            // No WS subscribers currently connected; not an error.
        }
    }

    fn pricing_for(&self, provider: &str) -> PricingRow {
        self.config.pricing.get(provider).cloned().unwrap_or(PricingRow {
            input_usd_per_million: 0.0,
            output_usd_per_million: 0.0,
        })
    }
}

/// Drives the worker loop described in §4.12: dequeue, pass through the
/// backpressure-scaled concurrency gate, spawn `process`.
pub struct LifecycleEngine {
    ctx: Arc<AppContext>,
    semaphore: Arc<Semaphore>,
    current_limit: AtomicUsize,
}

impl LifecycleEngine {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let initial = ctx.queue.max_concurrent().max(1);
        Self {
            ctx,
            semaphore: Arc::new(Semaphore::new(initial)),
            current_limit: AtomicUsize::new(initial),
        }
    }

    /// Spawns the worker loop and the backpressure resampler; returns
    /// their join handles so `gateway-cli` can await them on shutdown.
    pub fn spawn(self: Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let worker = {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_worker_loop().await })
        };
        let sampler = {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_backpressure_sampler().await })
        };
        (worker, sampler)
    }

    async fn run_worker_loop(&self) {
        loop {
            let Some(request) = self.ctx.queue.dequeue().await else {
                info!("lifecycle engine worker loop exiting on shutdown");
                return;
            };
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                Self::process(&ctx, request).await;
                drop(permit);
            });
        }
    }

    async fn run_backpressure_sampler(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let stats = self.ctx.queue.stats().await;
            let new_limit = self
                .ctx
                .backpressure
                .sample(stats.queue_depth, self.ctx.config.queue.max_queue_depth);
            self.ctx.queue.set_max_concurrent(new_limit);
            self.resize_semaphore(new_limit);
        }
    }

    fn resize_semaphore(&self, new_limit: usize) {
        let old_limit = self.current_limit.swap(new_limit, Ordering::SeqCst);
        if new_limit > old_limit {
            self.semaphore.add_permits(new_limit - old_limit);
        } else if new_limit < old_limit {
            self.semaphore.forget_permits(old_limit - new_limit);
        }
    }

    async fn process(ctx: &Arc<AppContext>, mut request: Request) {
        let request_id = request.id;
        if let Err(e) = ctx.store.update_request_status(request_id, RequestStatus::Processing).await {
            warn!(request_id = %request_id, error = %e, "failed to record Processing transition");
        }
        ctx.broadcast(GatewayEvent::RequestProcessing {
            request_id,
            provider: request.provider_hint.clone().unwrap_or_default(),
        });

        request
            .metadata
            .entry("original_message".to_string())
            .or_insert_with(|| serde_json::Value::String(request.message.clone()));
        let original_message = request
            .metadata
            .get("original_message")
            .and_then(|v| v.as_str())
            .unwrap_or(&request.message)
            .to_string();

        let mut message = request.message.clone();
        if let Some(hooks) = &ctx.memory_hooks {
            if let Some(prefix) = hooks.pre_call(request_id, &message).await {
                message = format!("{prefix}\n{message}");
            }
        }

        let decision = ctx.router.route(&message).await;
        let provider = request.provider_hint.clone().unwrap_or(decision.provider);

        let wants_parallel = request
            .metadata
            .get("parallel")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let retry_enabled = request
            .metadata
            .get("retry_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mut response_metadata: HashMap<String, serde_json::Value> = HashMap::new();
        let mut retries = 0u32;
        let mut actual_provider = provider.clone();

        let outcome = if wants_parallel {
            let providers = ctx.router.resolve_group(&provider);
            let strategy = request
                .metadata
                .get("aggregation_strategy")
                .and_then(|v| v.as_str())
                .and_then(parse_strategy)
                .unwrap_or(gateway_core::model::AggregationStrategy::FirstSuccess);
            let parallel_outcome = ctx
                .parallel
                .execute(&providers, &ctx.backends, &message, strategy, request.timeout_s)
                .await;
            let all_responses: Vec<serde_json::Value> = parallel_outcome
                .all_responses
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "provider": b.provider,
                        "success": b.outcome.is_ok(),
                        "content": b.outcome.clone().unwrap_or_default(),
                        "error": b.outcome.clone().err(),
                        "latency_ms": b.latency_ms,
                    })
                })
                .collect();
            response_metadata.insert("all_responses".into(), serde_json::Value::Array(all_responses));
            match parallel_outcome.chosen {
                Some(branch) => {
                    actual_provider = branch.provider.clone();
                    branch
                        .outcome
                        .map(|content| gateway_core::BackendOutput {
                            content,
                            input_tokens: 0,
                            output_tokens: 0,
                            latency_ms: branch.latency_ms,
                        })
                        .map_err(gateway_core::FailureClass::NonRetryablePermanent)
                }
                None => Err(gateway_core::FailureClass::NonRetryablePermanent(
                    "no provider in the parallel group succeeded".into(),
                )),
            }
        } else if retry_enabled {
            let store_for_transitions = ctx.store.clone();
            let on_transition = move |status: RequestStatus| {
                let store = store_for_transitions.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.update_request_status(request_id, status).await {
                        warn!(request_id = %request_id, error = %e, "failed to persist status transition");
                    }
                });
            };
            let (result, summary) = ctx
                .retry
                .execute(&provider, &ctx.backends, &message, request.timeout_s, &on_transition)
                .await;
            retries = summary.attempts.len().saturating_sub(1) as u32;
            if let Some(last) = summary.providers_tried.last() {
                actual_provider = last.clone();
            }
            let classifications: Vec<String> = summary
                .attempts
                .iter()
                .map(|a| a.classification.clone().unwrap_or_else(|| "Success".to_string()))
                .collect();
            response_metadata.insert(
                "retry_info".into(),
                serde_json::json!({
                    "attempts": summary.attempts.len(),
                    "classifications": classifications,
                    "providers": summary.providers_tried,
                }),
            );
            result
        } else {
            let call_timeout = Duration::from_secs(request.timeout_s.max(1));
            match ctx.backends.get(&provider) {
                Some(backend) => match tokio::time::timeout(call_timeout, backend.call(&message)).await {
                    Ok(r) => r,
                    Err(_) => Err(gateway_core::FailureClass::RetryableTransient(format!(
                        "call to {provider} exceeded {}s timeout",
                        request.timeout_s
                    ))),
                },
                None => Err(gateway_core::FailureClass::NonRetryablePermanent(format!(
                    "no backend registered for provider {provider}"
                ))),
            }
        };

        ctx.backpressure.record_outcome(outcome.is_ok());
        let provider = actual_provider;

        match outcome {
            Ok(output) => {
                let cost_usd = ctx
                    .store
                    .record_token_cost(
                        &provider,
                        output.input_tokens,
                        output.output_tokens,
                        request_id,
                        &ctx.pricing_for(&provider),
                    )
                    .await
                    .unwrap_or(0.0);
                ctx.router
                    .record_request(&provider, true, output.latency_ms as f64, cost_usd)
                    .await;

                let response = Response {
                    request_id,
                    provider: provider.clone(),
                    content: output.content.clone(),
                    latency_ms: output.latency_ms,
                    cost_usd,
                    input_tokens: output.input_tokens,
                    output_tokens: output.output_tokens,
                    cache_hit: false,
                    retries,
                    status: RequestStatus::Completed,
                    error: None,
                    thinking: None,
                    raw_output: None,
                    metadata: response_metadata,
                    completed_at: Utc::now(),
                };

                if let Err(e) = ctx.store.update_request_status(request_id, RequestStatus::Completed).await {
                    warn!(request_id = %request_id, error = %e, "failed to update request status");
                }
                if let Err(e) = ctx.store.save_response(response).await {
                    warn!(request_id = %request_id, error = %e, "failed to save response");
                }
                ctx.queue.mark_completed(request_id).await;
                if let Err(e) = ctx.cache.put(&provider, &original_message, &output.content).await {
                    warn!(request_id = %request_id, error = %e, "failed to populate cache");
                }
                ctx.metrics.record_request("completed", &provider);
                ctx.metrics.observe_latency_ms(&provider, output.latency_ms as f64);

                if let Some(hooks) = &ctx.memory_hooks {
                    hooks.post_call(request_id, &message, &output.content).await;
                }

                ctx.broadcast(GatewayEvent::RequestCompleted {
                    request_id,
                    provider,
                    latency_ms: output.latency_ms,
                });
            }
            Err(classification) => {
                ctx.router.record_request(&provider, false, 0.0, 0.0).await;
                let response = Response {
                    request_id,
                    provider: provider.clone(),
                    content: classification.to_string(),
                    latency_ms: 0,
                    cost_usd: 0.0,
                    input_tokens: 0,
                    output_tokens: 0,
                    cache_hit: false,
                    retries,
                    status: RequestStatus::Failed,
                    error: Some(classification.to_string()),
                    thinking: None,
                    raw_output: None,
                    metadata: response_metadata,
                    completed_at: Utc::now(),
                };
                if let Err(e) = ctx.store.update_request_status(request_id, RequestStatus::Failed).await {
                    warn!(request_id = %request_id, error = %e, "failed to update request status");
                }
                if let Err(e) = ctx.store.save_response(response).await {
                    warn!(request_id = %request_id, error = %e, "failed to save failure response");
                }
                ctx.metrics.record_request("failed", &provider);
                ctx.broadcast(GatewayEvent::RequestFailed {
                    request_id,
                    error: classification.to_string(),
                });
            }
        }
    }
}

fn parse_strategy(s: &str) -> Option<gateway_core::model::AggregationStrategy> {
    use gateway_core::model::AggregationStrategy::*;
    match s {
        "first_success" => Some(FirstSuccess),
        "fastest" => Some(Fastest),
        "all" => Some(All),
        "consensus" => Some(Consensus),
        _ => None,
    }
}

/// Request lifecycle helper for the server layer: marks `Queued` at
/// enqueue time so the status machine's first transition is recorded
/// consistently regardless of caller.
pub fn new_request(
    message: String,
    provider_hint: Option<String>,
    priority: i32,
    backend_type: BackendType,
) -> Request {
    new_request_with_timeout(message, provider_hint, priority, backend_type, 30)
}

pub fn new_request_with_timeout(
    message: String,
    provider_hint: Option<String>,
    priority: i32,
    backend_type: BackendType,
    timeout_s: u64,
) -> Request {
    let now = Utc::now();
    Request {
        id: Uuid::new_v4(),
        message,
        provider_hint,
        priority,
        status: RequestStatus::Queued,
        backend_type,
        timeout_s,
        created_at: now,
        updated_at: now,
        started_at: None,
        metadata: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_backpressure::Backpressure as Bp;
    use gateway_cache::CacheManagerConfig;
    use gateway_core::{BackendOutput, BackendResult, FailureClass};
    use gateway_store::InMemoryStateStore;
    use std::time::Duration as StdDuration;

    struct AlwaysOk;
    #[async_trait]
    impl Backend for AlwaysOk {
        fn name(&self) -> &str {
            "openai"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            Ok(BackendOutput {
                content: "reply".into(),
                input_tokens: 10,
                output_tokens: 20,
                latency_ms: 5,
            })
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl Backend for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }
        async fn call(&self, _message: &str) -> BackendResult {
            Err(FailureClass::NonRetryablePermanent("down".into()))
        }
    }

    fn test_ctx(backends: HashMap<String, Arc<dyn Backend>>) -> Arc<AppContext> {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let (tx, _rx) = broadcast::channel(16);
        let all_providers: Vec<String> = backends.keys().cloned().collect();
        Arc::new(AppContext {
            config: GatewayConfig::default(),
            store: store.clone(),
            cache: Arc::new(CacheManager::new(store.clone(), CacheManagerConfig::default())),
            queue: Arc::new(RequestQueue::new(100, 10)),
            health: Arc::new(HealthChecker::new(backends.clone(), 5, None)),
            backpressure: Arc::new(Bp::new(10)),
            reliability: Arc::new(ReliabilityTracker::new()),
            router: Arc::new(Router::new(
                vec![],
                all_providers.first().cloned().unwrap_or_default(),
                HashMap::new(),
                all_providers,
                None,
            )),
            retry: Arc::new(RetryExecutor::new(
                gateway_retry::RetryConfig {
                    max_retries: 1,
                    base_delay_s: 0.001,
                    rate_limit_base_delay_s: 0.001,
                    max_delay_s: 0.01,
                    fallback_enabled: false,
                    fallback_chains: HashMap::new(),
                },
                None,
                Arc::new(ReliabilityTracker::new()),
            )),
            parallel: Arc::new(ParallelExecutor::new(StdDuration::from_secs(5))),
            stream: Arc::new(StreamManager::new(store.clone(), 10)),
            discussion: Arc::new(DiscussionOrchestrator::new(
                store.clone(),
                backends.clone(),
                gateway_discussion::DiscussionConfig::default(),
            )),
            metrics: Arc::new(MetricsCollector::new().unwrap()),
            backends,
            memory_hooks: None,
            events: tx,
        })
    }

    #[tokio::test]
    async fn process_success_updates_status_and_populates_cache() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("openai".into(), Arc::new(AlwaysOk));
        let ctx = test_ctx(backends);
        let request = new_request("hello".into(), Some("openai".into()), 0, BackendType::Single);
        let request_id = request.id;
        ctx.store.create_request(request.clone()).await.unwrap();

        LifecycleEngine::process(&ctx, request).await;

        let stored = ctx.store.get_request(request_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        let response = ctx.store.get_response(request_id).await.unwrap().unwrap();
        assert_eq!(response.content, "reply");
        let cached = ctx.cache.get("openai", "hello").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn process_failure_records_failed_response() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("broken".into(), Arc::new(AlwaysFails));
        let ctx = test_ctx(backends);
        let request = new_request("hello".into(), Some("broken".into()), 0, BackendType::Single);
        let request_id = request.id;
        ctx.store.create_request(request.clone()).await.unwrap();

        LifecycleEngine::process(&ctx, request).await;

        let response = ctx.store.get_response(request_id).await.unwrap().unwrap();
        assert!(response.content.contains("down"));
        assert_eq!(response.status, RequestStatus::Failed);
        assert!(response.error.is_some());
        assert!(response.metadata.contains_key("retry_info"));
    }

    #[tokio::test]
    async fn process_success_attaches_retry_info_metadata() {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("openai".into(), Arc::new(AlwaysOk));
        let ctx = test_ctx(backends);
        let request = new_request("hello".into(), Some("openai".into()), 0, BackendType::Single);
        let request_id = request.id;
        ctx.store.create_request(request.clone()).await.unwrap();

        LifecycleEngine::process(&ctx, request).await;

        let response = ctx.store.get_response(request_id).await.unwrap().unwrap();
        let retry_info = response.metadata.get("retry_info").expect("retry_info present");
        assert_eq!(retry_info["attempts"], serde_json::json!(1));
        assert_eq!(retry_info["providers"], serde_json::json!(["openai"]));
    }
}
