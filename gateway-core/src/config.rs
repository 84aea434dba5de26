//! Configuration tree loaded by `gateway-cli` via `figment` (TOML + env
//! overlay). Kept in `gateway-core` so every crate can depend on the
//! concrete shape without depending on the CLI.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::PricingRow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_queue_depth: usize,
    pub max_concurrent: usize,
    pub request_ttl_s: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 1000,
            max_concurrent: 16,
            request_ttl_s: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub worker_count: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { worker_count: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    pub randomization_factor: f64,
    pub fallback_enabled: bool,
    #[serde(default)]
    pub fallback_chains: HashMap<String, Vec<String>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_interval_ms: 200,
            multiplier: 2.0,
            max_interval_ms: 5_000,
            randomization_factor: 0.2,
            fallback_enabled: false,
            fallback_chains: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub enabled: bool,
    pub max_concurrent_providers: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_providers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub header_name: String,
    #[serde(default)]
    pub public_paths: Vec<String>,
    pub allow_localhost: bool,
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: "x-api-key".into(),
            public_paths: vec!["/healthz".into(), "/metrics".into()],
            allow_localhost: false,
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub batch_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionConfig {
    pub rounds: u32,
    pub min_providers: usize,
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            min_providers: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
}

/// Root configuration tree, loaded once at startup and then immutable for
/// the process lifetime (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub discussion: DiscussionConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub pricing: HashMap<String, PricingRow>,
    #[serde(default)]
    pub provider_groups: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub default_provider: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            parallel: ParallelConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            streaming: StreamingConfig::default(),
            discussion: DiscussionConfig::default(),
            providers: HashMap::new(),
            pricing: HashMap::new(),
            provider_groups: HashMap::new(),
            default_provider: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.discussion.rounds, 3);
        assert!(cfg.providers.is_empty());
    }
}
