//! Wire and storage data model for the gateway (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a single gateway [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Processing,
    Retrying,
    Fallback,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl RequestStatus {
    /// Whether the given transition is legal per the state machine in §3.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Retrying)
                | (Processing, Fallback)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, Timeout)
                | (Retrying, Processing)
                | (Retrying, Retrying)
                | (Retrying, Fallback)
                | (Retrying, Completed)
                | (Retrying, Failed)
                | (Retrying, Cancelled)
                | (Retrying, Timeout)
                | (Fallback, Processing)
                | (Fallback, Retrying)
                | (Fallback, Fallback)
                | (Fallback, Completed)
                | (Fallback, Failed)
                | (Fallback, Cancelled)
                | (Fallback, Timeout)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Failed
                | RequestStatus::Cancelled
                | RequestStatus::Timeout
        )
    }
}

/// Which execution mode a request was routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    Single,
    Fallback,
    Parallel,
    Discussion,
}

/// A single inbound request to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub message: String,
    pub provider_hint: Option<String>,
    pub priority: i32,
    pub status: RequestStatus,
    pub backend_type: BackendType,
    /// Per-call timeout in seconds; bounds every individual backend
    /// attempt, not the retry/fallback loop as a whole (P1).
    pub timeout_s: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set the first time the request transitions into `Processing`.
    pub started_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outcome recorded once a [`Request`] finishes processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub provider: String,
    pub content: String,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_hit: bool,
    pub retries: u32,
    pub status: RequestStatus,
    pub error: Option<String>,
    pub thinking: Option<String>,
    pub raw_output: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub completed_at: DateTime<Utc>,
}

/// A cached message/response pair keyed by a content fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub provider: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
    pub last_hit_at: DateTime<Utc>,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEntryType {
    Chunk,
    Error,
    Done,
}

/// One chunk in a request's streamed output log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub request_id: Uuid,
    pub chunk_index: u64,
    pub entry_type: StreamEntryType,
    pub content: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Healthy,
    Degraded,
    Unavailable,
    Unknown,
}

/// Rolling health snapshot for one provider, maintained by the
/// HealthChecker with 3-failure / 2-success hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub status: ProviderStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub auto_disabled: bool,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ProviderHealth {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: ProviderStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            auto_disabled: false,
            last_check_at: None,
            last_error: None,
        }
    }
}

/// EMA-smoothed reliability/performance score for a provider (§4.5/§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityScore {
    pub provider: String,
    pub success_rate_ema: f64,
    pub avg_latency_ms_ema: f64,
    pub avg_cost_usd_ema: f64,
    pub sample_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl ReliabilityScore {
    pub fn initial(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            success_rate_ema: 1.0,
            avg_latency_ms_ema: 0.0,
            avg_cost_usd_ema: 0.0,
            sample_count: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl LoadLevel {
    /// Multiplicative scaling factor applied to concurrency/rate budgets (§4.4).
    pub fn scale_factor(self) -> f64 {
        match self {
            LoadLevel::Normal => 1.0,
            LoadLevel::Elevated => 0.8,
            LoadLevel::High => 0.5,
            LoadLevel::Critical => 0.25,
        }
    }
}

/// Sampled system load snapshot used by the Backpressure subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureState {
    pub level: LoadLevel,
    pub queue_depth_ratio: f64,
    pub rolling_success_rate: f64,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    FirstSuccess,
    Fastest,
    All,
    Consensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStatus {
    Active,
    Completed,
    Failed,
}

/// A multi-round, multi-provider discussion (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionSession {
    pub id: Uuid,
    pub topic: String,
    pub providers: Vec<String>,
    pub status: DiscussionStatus,
    pub parent_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Provider,
    Summary,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Failed,
}

/// One message within a [`DiscussionSession`] round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub round: u32,
    pub provider: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// Record of a single call through the optional pre/post memory hooks
/// (§9 null-object pattern) so callers can audit what was injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionRecord {
    pub request_id: Uuid,
    pub hook: String,
    pub injected_chars: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Per-provider USD/M-token pricing row used for cost estimation
/// (supplemented from `original_source/lib/gateway/models_core.py`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRow {
    pub input_usd_per_million: f64,
    pub output_usd_per_million: f64,
}

/// Aggregate status snapshot served at `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStats {
    pub total_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub cache_hit_rate: f64,
    pub queue_depth: usize,
    pub load_level: LoadLevel,
    pub uptime_s: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_status_transitions() {
        assert!(RequestStatus::Queued.can_transition_to(RequestStatus::Processing));
        assert!(RequestStatus::Processing.can_transition_to(RequestStatus::Completed));
        assert!(RequestStatus::Processing.can_transition_to(RequestStatus::Retrying));
        assert!(RequestStatus::Retrying.can_transition_to(RequestStatus::Fallback));
        assert!(RequestStatus::Fallback.can_transition_to(RequestStatus::Completed));
        assert!(!RequestStatus::Completed.can_transition_to(RequestStatus::Processing));
        assert!(!RequestStatus::Queued.can_transition_to(RequestStatus::Completed));
    }

    #[test]
    fn terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(RequestStatus::Timeout.is_terminal());
        assert!(!RequestStatus::Queued.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
    }

    #[test]
    fn load_level_scale_factors() {
        assert_eq!(LoadLevel::Normal.scale_factor(), 1.0);
        assert_eq!(LoadLevel::Elevated.scale_factor(), 0.8);
        assert_eq!(LoadLevel::High.scale_factor(), 0.5);
        assert_eq!(LoadLevel::Critical.scale_factor(), 0.25);
    }

    #[test]
    fn reliability_score_initial_state() {
        let s = ReliabilityScore::initial("openai");
        assert_eq!(s.success_rate_ema, 1.0);
        assert_eq!(s.sample_count, 0);
    }
}
