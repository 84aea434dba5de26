use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::model::{
    CacheEntry, DiscussionMessage, DiscussionSession, GatewayStats, MessageStatus, PricingRow,
    ProviderHealth, Request, RequestStatus, Response, StreamEntry,
};
use uuid::Uuid;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_hits: u64,
    pub total_misses: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Durable storage of requests, responses, metrics, cost, cache,
/// discussions and stream entries (§4.1). Every operation group named in
/// the spec is one method group below; every row mutation is atomic.
#[async_trait]
pub trait StateStore: Send + Sync {
    // Request CRUD
    async fn create_request(&self, request: Request) -> StoreResult<()>;
    async fn get_request(&self, id: Uuid) -> StoreResult<Option<Request>>;
    async fn update_request_status(&self, id: Uuid, status: RequestStatus) -> StoreResult<()>;
    async fn list_requests(
        &self,
        filter: RequestFilter,
        order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Request>>;
    async fn cleanup_requests_older_than(&self, hours: i64) -> StoreResult<u64>;

    // Response
    async fn save_response(&self, response: Response) -> StoreResult<()>;
    async fn get_response(&self, request_id: Uuid) -> StoreResult<Option<Response>>;

    // Metrics
    async fn record_metric(
        &self,
        provider: &str,
        event_type: &str,
        latency_ms: u64,
        success: bool,
        error: Option<&str>,
    ) -> StoreResult<()>;

    // Cost
    async fn record_token_cost(
        &self,
        provider: &str,
        input_tokens: u64,
        output_tokens: u64,
        request_id: Uuid,
        pricing: &PricingRow,
    ) -> StoreResult<f64>;
    async fn cost_summary(&self, days: u32) -> StoreResult<CostSummary>;
    async fn cost_by_provider(&self, days: u32) -> StoreResult<Vec<(String, CostSummary)>>;
    async fn cost_by_day(&self, days: u32) -> StoreResult<Vec<(DateTime<Utc>, CostSummary)>>;

    // Provider status snapshot
    async fn update_provider_status(&self, health: ProviderHealth) -> StoreResult<()>;
    async fn get_provider_status(&self, provider: &str) -> StoreResult<Option<ProviderHealth>>;

    // Discussion
    async fn create_session(&self, session: DiscussionSession) -> StoreResult<()>;
    async fn update_session(&self, session: DiscussionSession) -> StoreResult<()>;
    async fn get_session(&self, id: Uuid) -> StoreResult<Option<DiscussionSession>>;
    async fn list_sessions(&self) -> StoreResult<Vec<DiscussionSession>>;
    async fn create_message(&self, message: DiscussionMessage) -> StoreResult<()>;
    async fn update_message(&self, id: Uuid, status: MessageStatus) -> StoreResult<()>;
    async fn get_messages(
        &self,
        session_id: Uuid,
        round: Option<u32>,
        provider: Option<&str>,
    ) -> StoreResult<Vec<DiscussionMessage>>;

    // Cache
    async fn cache_get(&self, provider: &str, fingerprint: &str) -> StoreResult<Option<CacheEntry>>;
    /// Bumps the global miss counter. Callers record a miss whenever a
    /// lookup didn't yield a usable entry, including entries `cache_get`
    /// returned that the caller then treats as expired.
    async fn cache_record_miss(&self) -> StoreResult<()>;
    async fn cache_put(&self, entry: CacheEntry) -> StoreResult<()>;
    async fn cache_cleanup_expired(&self, ttl_s: u64) -> StoreResult<u64>;
    async fn cache_enforce_max_entries(&self, max_entries: usize) -> StoreResult<u64>;
    async fn cache_clear(&self, provider: Option<&str>) -> StoreResult<u64>;
    async fn cache_stats(&self) -> StoreResult<CacheStats>;
    async fn cache_top_entries(&self, n: usize) -> StoreResult<Vec<CacheEntry>>;

    // Stream entries
    async fn append_stream_entries(&self, entries: Vec<StreamEntry>) -> StoreResult<()>;
    async fn stream_entries(&self, request_id: Uuid) -> StoreResult<Vec<StreamEntry>>;
    async fn search_thinking(&self, substring: &str) -> StoreResult<Vec<StreamEntry>>;

    async fn stats(&self) -> StoreResult<GatewayStats>;
}
