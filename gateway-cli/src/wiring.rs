//! Constructs the single `AppContext` shared by the worker loop and the
//! HTTP surface (§9: one context, no singletons).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_backpressure::Backpressure;
use gateway_cache::{CacheManager, CacheManagerConfig};
use gateway_core::{Backend, GatewayConfig};
use gateway_discussion::{DiscussionConfig, DiscussionOrchestrator};
use gateway_health::HealthChecker;
use gateway_metrics::MetricsCollector;
use gateway_parallel::ParallelExecutor;
use gateway_queue::RequestQueue;
use gateway_reliability::ReliabilityTracker;
use gateway_retry::{RetryConfig as ExecutorRetryConfig, RetryExecutor};
use gateway_router::{Router, RoutingRule};
use gateway_store::{InMemoryStateStore, StateStore};
use gateway_stream::StreamManager;
use tokio::sync::broadcast;

use crate::http_backend::HttpBackend;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

fn build_backends(config: &GatewayConfig) -> HashMap<String, Arc<dyn Backend>> {
    let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
    for (name, provider) in &config.providers {
        if !provider.enabled {
            continue;
        }
        let Some(base_url) = &provider.base_url else {
            tracing::warn!(provider = %name, "enabled provider has no base_url configured, skipping");
            continue;
        };
        let api_key = provider
            .api_key_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var).ok());
        backends.insert(
            name.clone(),
            Arc::new(HttpBackend::new(name.clone(), base_url.clone(), api_key, Duration::from_secs(30))),
        );
    }
    backends
}

fn executor_retry_config(config: &GatewayConfig) -> ExecutorRetryConfig {
    ExecutorRetryConfig {
        max_retries: config.retry.max_attempts,
        base_delay_s: config.retry.initial_interval_ms as f64 / 1000.0,
        rate_limit_base_delay_s: (config.retry.initial_interval_ms as f64 / 1000.0) * config.retry.multiplier,
        max_delay_s: config.retry.max_interval_ms as f64 / 1000.0,
        fallback_enabled: config.retry.fallback_enabled,
        fallback_chains: config.retry.fallback_chains.clone(),
    }
}

/// Builds every component and returns the shared `AppContext` plus an
/// `Authenticator` (kept separate since the HTTP surface, not the
/// engine, consumes it).
pub fn build(config: GatewayConfig) -> (Arc<gateway_engine::AppContext>, Arc<gateway_auth::Authenticator>) {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let backends = build_backends(&config);
    let all_providers: Vec<String> = backends.keys().cloned().collect();

    let health = Arc::new(HealthChecker::new(backends.clone(), 5, None));
    let reliability = Arc::new(ReliabilityTracker::new());

    let default_provider = if config.default_provider.is_empty() {
        all_providers.first().cloned().unwrap_or_default()
    } else {
        config.default_provider.clone()
    };

    let router = Arc::new(Router::new(
        Vec::<RoutingRule>::new(),
        default_provider,
        config.provider_groups.clone(),
        all_providers,
        Some(health.clone()),
    ));

    let retry = Arc::new(RetryExecutor::new(executor_retry_config(&config), Some(health.clone()), reliability.clone()));
    let parallel = Arc::new(ParallelExecutor::new(Duration::from_secs(30)));
    let cache = Arc::new(CacheManager::new(
        store.clone(),
        CacheManagerConfig {
            enabled: config.cache.enabled,
            ttl_s: config.cache.ttl_s,
            max_entries: config.cache.max_entries,
        },
    ));
    let queue = Arc::new(RequestQueue::new(config.queue.max_queue_depth, config.queue.max_concurrent));
    let backpressure = Arc::new(Backpressure::new(config.queue.max_concurrent));
    let stream = Arc::new(StreamManager::new(store.clone(), config.streaming.batch_size));
    let discussion = Arc::new(DiscussionOrchestrator::new(
        store.clone(),
        backends.clone(),
        DiscussionConfig {
            rounds: config.discussion.rounds,
            min_providers: config.discussion.min_providers,
            ..DiscussionConfig::default()
        },
    ));
    let metrics = Arc::new(MetricsCollector::new().expect("metrics registration should not collide at startup"));
    let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let auth = Arc::new(gateway_auth::Authenticator::new(gateway_auth::AuthConfig {
        public_paths: config.auth.public_paths.clone(),
        allow_localhost: config.auth.allow_localhost,
        rate_limit: gateway_auth::RateLimitConfig {
            requests_per_minute: config.rate_limit.requests_per_minute,
            burst_size: config.rate_limit.burst_size,
        },
    }));

    let ctx = Arc::new(gateway_engine::AppContext {
        config,
        store,
        cache,
        queue,
        health,
        backpressure,
        reliability,
        router,
        retry,
        parallel,
        stream,
        discussion,
        metrics,
        backends,
        memory_hooks: None,
        events,
    });

    (ctx, auth)
}
