//! C14: API-key authentication and token-bucket rate limiting.
//!
//! Keys are hashed at rest with Argon2id ([`keys::ApiKeyStore`]); the
//! plaintext is only ever visible once, at creation. Rate limiting is a
//! token bucket per key and per client IP ([`ratelimit::RateLimiter`]).
//! [`Authenticator`] wires both together with the public-path and
//! localhost bypass rules.

pub mod error;
pub mod keys;
pub mod ratelimit;

pub use error::AuthError;
pub use keys::{ApiKey, ApiKeyStore};
pub use ratelimit::{KeyedRateLimiter, RateLimitConfig, RateLimiter};

use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Request paths that never require an API key (e.g. `/healthz`).
    pub public_paths: Vec<String>,
    /// When true, requests from 127.0.0.1/::1 skip the API-key check.
    pub allow_localhost: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_paths: vec!["/healthz".to_string(), "/metrics".to_string()],
            allow_localhost: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn is_localhost(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Outcome of a successful auth check, handed back to the caller (the
/// server layer) so it can stamp the request with who made it.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub key_id: uuid::Uuid,
    pub key_name: String,
}

/// Gate in front of the HTTP/WS surface: checks public-path and
/// localhost bypasses, then API key, then rate limit.
pub struct Authenticator {
    pub keys: ApiKeyStore,
    pub rate_limiter: RateLimiter,
    config: AuthConfig,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            keys: ApiKeyStore::new(),
            rate_limiter: RateLimiter::new(config.rate_limit),
            config,
        }
    }

    fn is_public_path(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|p| p == path)
    }

    /// Runs the full auth gate for an inbound request. `presented_key`
    /// is `None` when no `Authorization`/`X-API-Key` header was sent.
    pub async fn authenticate(
        &self,
        path: &str,
        client_ip: IpAddr,
        presented_key: Option<&str>,
    ) -> Result<Option<Authenticated>, AuthError> {
        if self.is_public_path(path) {
            return Ok(None);
        }

        if self.config.allow_localhost && is_localhost(client_ip) {
            return Ok(None);
        }

        let plaintext = presented_key.ok_or(AuthError::MissingKey)?;
        let key = self.keys.verify(plaintext).await?;

        self.rate_limiter
            .check(&key.id.to_string(), &client_ip.to_string())
            .await?;

        Ok(Some(Authenticated {
            key_id: key.id,
            key_name: key.name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn public_path_bypasses_auth() {
        let auth = Authenticator::new(AuthConfig::default());
        let result = auth
            .authenticate("/healthz", "10.0.0.1".parse().unwrap(), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn localhost_bypass_when_enabled() {
        let auth = Authenticator::new(AuthConfig {
            allow_localhost: true,
            ..AuthConfig::default()
        });
        let result = auth
            .authenticate("/api/ask", "127.0.0.1".parse().unwrap(), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_key_is_rejected_on_protected_path() {
        let auth = Authenticator::new(AuthConfig::default());
        let result = auth.authenticate("/api/ask", "10.0.0.1".parse().unwrap(), None).await;
        assert!(matches!(result, Err(AuthError::MissingKey)));
    }

    #[tokio::test]
    async fn valid_key_authenticates_on_protected_path() {
        let auth = Authenticator::new(AuthConfig::default());
        let (id, plaintext) = auth.keys.create("ci-bot", "sk_live").await.unwrap();
        let authenticated = auth
            .authenticate("/api/ask", "10.0.0.1".parse().unwrap(), Some(&plaintext))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(authenticated.key_id, id);
    }

    #[tokio::test]
    async fn rate_limit_trips_after_burst() {
        let auth = Authenticator::new(AuthConfig {
            rate_limit: RateLimitConfig {
                requests_per_minute: 60,
                burst_size: 1,
            },
            ..AuthConfig::default()
        });
        let (_id, plaintext) = auth.keys.create("ci-bot", "sk_live").await.unwrap();
        let ip = "10.0.0.1".parse().unwrap();
        auth.authenticate("/api/ask", ip, Some(&plaintext)).await.unwrap();
        let result = auth.authenticate("/api/ask", ip, Some(&plaintext)).await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));
    }
}
