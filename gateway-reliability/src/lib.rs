//! ReliabilityTracker (C5): EMA-smoothed per-provider reliability score
//! and sticky authentication-failure detection (§4.5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

const EMA_ALPHA: f64 = 0.1;
const AUTH_FAILURE_STICKY_THRESHOLD: u32 = 1;

const AUTH_SUBSTRINGS: &[&str] = &["401", "403", "invalid api key", "unauthorized", "forbidden"];

#[derive(Debug, Clone)]
pub struct ReliabilityState {
    pub reliability_score: f64,
    pub auth_failure_count: u32,
    pub needs_reauth: bool,
    pub last_auth_failure: Option<DateTime<Utc>>,
}

impl Default for ReliabilityState {
    fn default() -> Self {
        Self {
            reliability_score: 1.0,
            auth_failure_count: 0,
            needs_reauth: false,
            last_auth_failure: None,
        }
    }
}

fn looks_like_auth_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    AUTH_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

pub struct ReliabilityTracker {
    state: RwLock<HashMap<String, ReliabilityState>>,
}

impl Default for ReliabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_success(&self, provider: &str) {
        let mut state = self.state.write().await;
        let entry = state.entry(provider.to_string()).or_default();
        entry.reliability_score = EMA_ALPHA * 1.0 + (1.0 - EMA_ALPHA) * entry.reliability_score;
    }

    pub async fn record_failure(&self, provider: &str, error: &str) {
        let mut state = self.state.write().await;
        let entry = state.entry(provider.to_string()).or_default();
        entry.reliability_score = EMA_ALPHA * 0.0 + (1.0 - EMA_ALPHA) * entry.reliability_score;
        if looks_like_auth_error(error) {
            entry.auth_failure_count += 1;
            entry.last_auth_failure = Some(Utc::now());
            if entry.auth_failure_count >= AUTH_FAILURE_STICKY_THRESHOLD {
                entry.needs_reauth = true;
            }
        }
    }

    pub async fn reset_auth(&self, provider: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.get_mut(provider) {
            entry.auth_failure_count = 0;
            entry.needs_reauth = false;
            entry.last_auth_failure = None;
        }
    }

    pub async fn score(&self, provider: &str) -> ReliabilityState {
        self.state
            .read()
            .await
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn needs_reauth(&self, provider: &str) -> bool {
        self.state
            .read()
            .await
            .get(provider)
            .map(|s| s.needs_reauth)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_pushes_score_toward_one() {
        let tracker = ReliabilityTracker::new();
        tracker.record_failure("p", "network reset").await;
        let before = tracker.score("p").await.reliability_score;
        tracker.record_success("p").await;
        let after = tracker.score("p").await.reliability_score;
        assert!(after > before);
    }

    #[tokio::test]
    async fn failure_pushes_score_toward_zero() {
        let tracker = ReliabilityTracker::new();
        let before = tracker.score("p").await.reliability_score;
        tracker.record_failure("p", "network reset").await;
        let after = tracker.score("p").await.reliability_score;
        assert!(after < before);
    }

    #[tokio::test]
    async fn auth_error_sets_needs_reauth() {
        let tracker = ReliabilityTracker::new();
        tracker.record_failure("p", "HTTP 401 Unauthorized").await;
        assert!(tracker.needs_reauth("p").await);
    }

    #[tokio::test]
    async fn non_auth_error_does_not_set_needs_reauth() {
        let tracker = ReliabilityTracker::new();
        tracker.record_failure("p", "connection reset by peer").await;
        assert!(!tracker.needs_reauth("p").await);
    }

    #[tokio::test]
    async fn reset_auth_clears_sticky_flag() {
        let tracker = ReliabilityTracker::new();
        tracker.record_failure("p", "403 forbidden").await;
        assert!(tracker.needs_reauth("p").await);
        tracker.reset_auth("p").await;
        assert!(!tracker.needs_reauth("p").await);
    }
}
