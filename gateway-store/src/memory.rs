//! Default zero-dependency `StateStore`, grounded in
//! `adk-session::InMemorySessionService`'s composite-key
//! `Arc<RwLock<HashMap<...>>>` pattern.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gateway_core::model::{
    CacheEntry, DiscussionMessage, DiscussionSession, GatewayStats, LoadLevel, MessageStatus,
    PricingRow, ProviderHealth, Request, RequestStatus, Response, StreamEntry,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::traits::{CacheStats, CostSummary, RequestFilter, SortOrder, StateStore, StoreResult};

#[derive(Default)]
struct Inner {
    requests: HashMap<Uuid, Request>,
    responses: HashMap<Uuid, Response>,
    metrics: Vec<MetricRow>,
    token_costs: Vec<CostRow>,
    provider_status: HashMap<String, ProviderHealth>,
    sessions: HashMap<Uuid, DiscussionSession>,
    messages: HashMap<Uuid, DiscussionMessage>,
    /// (provider, fingerprint) -> entry
    cache: HashMap<(String, String), CacheEntry>,
    cache_misses: u64,
    /// request_id -> ordered entries
    stream_entries: HashMap<Uuid, Vec<StreamEntry>>,
    started_at: DateTime<Utc>,
}

struct MetricRow {
    #[allow(dead_code)]
    provider: String,
    #[allow(dead_code)]
    event_type: String,
    #[allow(dead_code)]
    latency_ms: u64,
    success: bool,
    #[allow(dead_code)]
    error: Option<String>,
    recorded_at: DateTime<Utc>,
}

struct CostRow {
    provider: String,
    input_tokens: u64,
    output_tokens: u64,
    #[allow(dead_code)]
    request_id: Uuid,
    cost_usd: f64,
    recorded_at: DateTime<Utc>,
}

/// Process-local, non-durable [`StateStore`] used as the default and in
/// tests. All state lives behind a single `RwLock` since row volumes are
/// small enough that a coarse lock never becomes the bottleneck.
pub struct InMemoryStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                started_at: Utc::now(),
                ..Default::default()
            })),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_request(&self, request: Request) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.requests.insert(request.id, request);
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<Request>> {
        let inner = self.inner.read().await;
        Ok(inner.requests.get(&id).cloned())
    }

    async fn update_request_status(&self, id: Uuid, status: RequestStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let req = inner.requests.get_mut(&id).ok_or(StoreError::NotFound)?;
        req.status = status;
        req.updated_at = Utc::now();
        if status == RequestStatus::Processing && req.started_at.is_none() {
            req.started_at = Some(req.updated_at);
        }
        Ok(())
    }

    async fn list_requests(
        &self,
        filter: RequestFilter,
        order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Request>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Request> = inner
            .requests
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| {
                filter
                    .provider
                    .as_ref()
                    .map_or(true, |p| r.provider_hint.as_deref() == Some(p.as_str()))
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        if order == SortOrder::Desc {
            rows.reverse();
        }
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn cleanup_requests_older_than(&self, hours: i64) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - ChronoDuration::hours(hours);
        let before = inner.requests.len();
        inner.requests.retain(|_, r| r.created_at >= cutoff);
        Ok((before - inner.requests.len()) as u64)
    }

    async fn save_response(&self, response: Response) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.responses.insert(response.request_id, response);
        Ok(())
    }

    async fn get_response(&self, request_id: Uuid) -> StoreResult<Option<Response>> {
        let inner = self.inner.read().await;
        Ok(inner.responses.get(&request_id).cloned())
    }

    async fn record_metric(
        &self,
        provider: &str,
        event_type: &str,
        latency_ms: u64,
        success: bool,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.metrics.push(MetricRow {
            provider: provider.to_string(),
            event_type: event_type.to_string(),
            latency_ms,
            success,
            error: error.map(str::to_string),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn record_token_cost(
        &self,
        provider: &str,
        input_tokens: u64,
        output_tokens: u64,
        request_id: Uuid,
        pricing: &PricingRow,
    ) -> StoreResult<f64> {
        let cost_usd = (input_tokens as f64 / 1_000_000.0) * pricing.input_usd_per_million
            + (output_tokens as f64 / 1_000_000.0) * pricing.output_usd_per_million;
        let mut inner = self.inner.write().await;
        inner.token_costs.push(CostRow {
            provider: provider.to_string(),
            input_tokens,
            output_tokens,
            request_id,
            cost_usd,
            recorded_at: Utc::now(),
        });
        Ok(cost_usd)
    }

    async fn cost_summary(&self, days: u32) -> StoreResult<CostSummary> {
        let inner = self.inner.read().await;
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        Ok(inner
            .token_costs
            .iter()
            .filter(|r| r.recorded_at >= cutoff)
            .fold(CostSummary::default(), |mut acc, r| {
                acc.total_cost_usd += r.cost_usd;
                acc.input_tokens += r.input_tokens;
                acc.output_tokens += r.output_tokens;
                acc
            }))
    }

    async fn cost_by_provider(&self, days: u32) -> StoreResult<Vec<(String, CostSummary)>> {
        let inner = self.inner.read().await;
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        let mut by_provider: HashMap<String, CostSummary> = HashMap::new();
        for r in inner.token_costs.iter().filter(|r| r.recorded_at >= cutoff) {
            let entry = by_provider.entry(r.provider.clone()).or_default();
            entry.total_cost_usd += r.cost_usd;
            entry.input_tokens += r.input_tokens;
            entry.output_tokens += r.output_tokens;
        }
        Ok(by_provider.into_iter().collect())
    }

    async fn cost_by_day(&self, days: u32) -> StoreResult<Vec<(DateTime<Utc>, CostSummary)>> {
        let inner = self.inner.read().await;
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        let mut by_day: HashMap<DateTime<Utc>, CostSummary> = HashMap::new();
        for r in inner.token_costs.iter().filter(|r| r.recorded_at >= cutoff) {
            let day = r
                .recorded_at
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc();
            let entry = by_day.entry(day).or_default();
            entry.total_cost_usd += r.cost_usd;
            entry.input_tokens += r.input_tokens;
            entry.output_tokens += r.output_tokens;
        }
        let mut rows: Vec<_> = by_day.into_iter().collect();
        rows.sort_by_key(|(day, _)| *day);
        Ok(rows)
    }

    async fn update_provider_status(&self, health: ProviderHealth) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.provider_status.insert(health.provider.clone(), health);
        Ok(())
    }

    async fn get_provider_status(&self, provider: &str) -> StoreResult<Option<ProviderHealth>> {
        let inner = self.inner.read().await;
        Ok(inner.provider_status.get(provider).cloned())
    }

    async fn create_session(&self, session: DiscussionSession) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn update_session(&self, session: DiscussionSession) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<DiscussionSession>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self) -> StoreResult<Vec<DiscussionSession>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.values().cloned().collect())
    }

    async fn create_message(&self, message: DiscussionMessage) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.messages.insert(message.id, message);
        Ok(())
    }

    async fn update_message(&self, id: Uuid, status: MessageStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let msg = inner.messages.get_mut(&id).ok_or(StoreError::NotFound)?;
        msg.status = status;
        Ok(())
    }

    async fn get_messages(
        &self,
        session_id: Uuid,
        round: Option<u32>,
        provider: Option<&str>,
    ) -> StoreResult<Vec<DiscussionMessage>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<DiscussionMessage> = inner
            .messages
            .values()
            .filter(|m| m.session_id == session_id)
            .filter(|m| round.map_or(true, |r| m.round == r))
            .filter(|m| provider.map_or(true, |p| m.provider.as_deref() == Some(p)))
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.round, m.created_at));
        Ok(rows)
    }

    async fn cache_get(&self, provider: &str, fingerprint: &str) -> StoreResult<Option<CacheEntry>> {
        let mut inner = self.inner.write().await;
        let key = (provider.to_string(), fingerprint.to_string());
        if let Some(entry) = inner.cache.get_mut(&key) {
            entry.hit_count += 1;
            entry.last_hit_at = Utc::now();
            return Ok(Some(entry.clone()));
        }
        Ok(None)
    }

    async fn cache_record_miss(&self) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.cache_misses += 1;
        Ok(())
    }

    async fn cache_put(&self, entry: CacheEntry) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .cache
            .insert((entry.provider.clone(), entry.fingerprint.clone()), entry);
        Ok(())
    }

    async fn cache_cleanup_expired(&self, ttl_s: u64) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - ChronoDuration::seconds(ttl_s as i64);
        let before = inner.cache.len();
        inner.cache.retain(|_, e| e.created_at >= cutoff);
        Ok((before - inner.cache.len()) as u64)
    }

    async fn cache_enforce_max_entries(&self, max_entries: usize) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        if inner.cache.len() <= max_entries {
            return Ok(0);
        }
        let mut by_hit: Vec<(String, String, DateTime<Utc>)> = inner
            .cache
            .iter()
            .map(|((p, f), e)| (p.clone(), f.clone(), e.last_hit_at))
            .collect();
        by_hit.sort_by_key(|(_, _, last_hit)| *last_hit);
        let to_remove = inner.cache.len() - max_entries;
        let mut removed = 0u64;
        for (provider, fingerprint, _) in by_hit.into_iter().take(to_remove) {
            inner.cache.remove(&(provider, fingerprint));
            removed += 1;
        }
        Ok(removed)
    }

    async fn cache_clear(&self, provider: Option<&str>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.cache.len();
        match provider {
            Some(p) => inner.cache.retain(|(provider, _), _| provider != p),
            None => inner.cache.clear(),
        }
        Ok((before - inner.cache.len()) as u64)
    }

    async fn cache_stats(&self) -> StoreResult<CacheStats> {
        let inner = self.inner.read().await;
        Ok(CacheStats {
            total_entries: inner.cache.len(),
            total_hits: inner.cache.values().map(|e| e.hit_count).sum(),
            total_misses: inner.cache_misses,
        })
    }

    async fn cache_top_entries(&self, n: usize) -> StoreResult<Vec<CacheEntry>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<CacheEntry> = inner.cache.values().cloned().collect();
        rows.sort_by_key(|e| std::cmp::Reverse(e.hit_count));
        rows.truncate(n);
        Ok(rows)
    }

    async fn append_stream_entries(&self, entries: Vec<StreamEntry>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        for entry in entries {
            inner.stream_entries.entry(entry.request_id).or_default().push(entry);
        }
        Ok(())
    }

    async fn stream_entries(&self, request_id: Uuid) -> StoreResult<Vec<StreamEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.stream_entries.get(&request_id).cloned().unwrap_or_default())
    }

    async fn search_thinking(&self, substring: &str) -> StoreResult<Vec<StreamEntry>> {
        let inner = self.inner.read().await;
        let needle = substring.to_lowercase();
        Ok(inner
            .stream_entries
            .values()
            .flatten()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> StoreResult<GatewayStats> {
        let inner = self.inner.read().await;
        let total = inner.requests.len() as u64;
        let completed = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Completed)
            .count() as u64;
        let failed = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Failed)
            .count() as u64;
        let cache_hit_rate = {
            let hits: u64 = inner.cache.values().map(|e| e.hit_count).sum();
            let total_lookups = hits + inner.cache_misses;
            if total_lookups == 0 {
                0.0
            } else {
                hits as f64 / total_lookups as f64
            }
        };
        let success_rate = {
            let n = inner.metrics.len();
            if n == 0 {
                1.0
            } else {
                inner.metrics.iter().filter(|m| m.success).count() as f64 / n as f64
            }
        };
        let uptime_s = (Utc::now() - inner.started_at).num_seconds().max(0) as u64;
        Ok(GatewayStats {
            total_requests: total,
            completed_requests: completed,
            failed_requests: failed,
            cache_hit_rate,
            queue_depth: 0,
            load_level: if success_rate < 0.5 {
                LoadLevel::Critical
            } else {
                LoadLevel::Normal
            },
            uptime_s,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::model::BackendType;
    use std::collections::HashMap as Map;

    fn sample_request() -> Request {
        Request {
            id: Uuid::new_v4(),
            message: "hello".into(),
            provider_hint: Some("openai".into()),
            priority: 50,
            status: RequestStatus::Queued,
            backend_type: BackendType::Single,
            timeout_s: 30,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn create_and_get_request_roundtrips() {
        let store = InMemoryStateStore::new();
        let req = sample_request();
        store.create_request(req.clone()).await.unwrap();
        let fetched = store.get_request(req.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, req.id);
        assert_eq!(fetched.status, RequestStatus::Queued);
    }

    #[tokio::test]
    async fn update_status_transitions() {
        let store = InMemoryStateStore::new();
        let req = sample_request();
        store.create_request(req.clone()).await.unwrap();
        store
            .update_request_status(req.id, RequestStatus::Processing)
            .await
            .unwrap();
        let fetched = store.get_request(req.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RequestStatus::Processing);
    }

    #[tokio::test]
    async fn update_status_stamps_started_at_once() {
        let store = InMemoryStateStore::new();
        let req = sample_request();
        store.create_request(req.clone()).await.unwrap();
        store
            .update_request_status(req.id, RequestStatus::Processing)
            .await
            .unwrap();
        let first = store.get_request(req.id).await.unwrap().unwrap();
        assert!(first.started_at.is_some());
        store
            .update_request_status(req.id, RequestStatus::Retrying)
            .await
            .unwrap();
        let second = store.get_request(req.id).await.unwrap().unwrap();
        assert_eq!(second.started_at, first.started_at);
    }

    #[tokio::test]
    async fn update_status_missing_request_errors() {
        let store = InMemoryStateStore::new();
        let err = store
            .update_request_status(Uuid::new_v4(), RequestStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn cache_hit_bumps_counters() {
        let store = InMemoryStateStore::new();
        let entry = CacheEntry {
            fingerprint: "abc".into(),
            provider: "openai".into(),
            response: "hi".into(),
            created_at: Utc::now(),
            last_hit_at: Utc::now(),
            hit_count: 0,
        };
        store.cache_put(entry).await.unwrap();
        let hit = store.cache_get("openai", "abc").await.unwrap().unwrap();
        assert_eq!(hit.hit_count, 1);
        let hit2 = store.cache_get("openai", "abc").await.unwrap().unwrap();
        assert_eq!(hit2.hit_count, 2);
    }

    #[tokio::test]
    async fn cache_miss_then_hit_reports_both_counters() {
        let store = InMemoryStateStore::new();
        assert!(store.cache_get("openai", "abc").await.unwrap().is_none());
        store.cache_record_miss().await.unwrap();
        store
            .cache_put(CacheEntry {
                fingerprint: "abc".into(),
                provider: "openai".into(),
                response: "hi".into(),
                created_at: Utc::now(),
                last_hit_at: Utc::now(),
                hit_count: 0,
            })
            .await
            .unwrap();
        store.cache_get("openai", "abc").await.unwrap();
        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.total_misses, 1);
    }

    #[tokio::test]
    async fn cache_enforce_max_entries_evicts_lru() {
        let store = InMemoryStateStore::new();
        for i in 0..5 {
            store
                .cache_put(CacheEntry {
                    fingerprint: format!("f{i}"),
                    provider: "openai".into(),
                    response: "hi".into(),
                    created_at: Utc::now(),
                    last_hit_at: Utc::now() - ChronoDuration::seconds(5 - i),
                    hit_count: 0,
                })
                .await
                .unwrap();
        }
        let removed = store.cache_enforce_max_entries(3).await.unwrap();
        assert_eq!(removed, 2);
        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats.total_entries, 3);
    }

    #[tokio::test]
    async fn record_token_cost_computes_usd() {
        let store = InMemoryStateStore::new();
        let pricing = PricingRow {
            input_usd_per_million: 1.0,
            output_usd_per_million: 2.0,
        };
        let cost = store
            .record_token_cost("openai", 1_000_000, 500_000, Uuid::new_v4(), &pricing)
            .await
            .unwrap();
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_thinking_is_case_insensitive_substring() {
        let store = InMemoryStateStore::new();
        let request_id = Uuid::new_v4();
        store
            .append_stream_entries(vec![StreamEntry {
                request_id,
                chunk_index: 0,
                entry_type: gateway_core::model::StreamEntryType::Chunk,
                content: "Considering the Weather patterns".into(),
                is_final: false,
                timestamp: Utc::now(),
            }])
            .await
            .unwrap();
        let hits = store.search_thinking("weather").await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
