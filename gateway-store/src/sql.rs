//! Durable `StateStore` backed by `sqlx`/SQLite, behind the `database`
//! feature. Grounded in the teacher's and `Govcraft-acton-service`'s use
//! of `sqlx` for durable persistence; required indexes follow §6.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::model::{
    CacheEntry, DiscussionMessage, DiscussionSession, DiscussionStatus, GatewayStats, LoadLevel,
    MessageRole, MessageStatus, PricingRow, ProviderHealth, ProviderStatus, Request,
    RequestStatus, Response, StreamEntry, StreamEntryType,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;
use crate::traits::{CacheStats, CostSummary, RequestFilter, SortOrder, StateStore, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    message TEXT NOT NULL,
    provider_hint TEXT,
    priority INTEGER NOT NULL,
    status TEXT NOT NULL,
    backend_type TEXT NOT NULL,
    timeout_s INTEGER NOT NULL DEFAULT 30,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    metadata TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_requests_status_created
    ON requests (status, created_at);

CREATE TABLE IF NOT EXISTS responses (
    request_id TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    content TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    cost_usd REAL NOT NULL,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    cache_hit INTEGER NOT NULL,
    retries INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'completed',
    error TEXT,
    thinking TEXT,
    raw_output TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    completed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    event_type TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    success INTEGER NOT NULL,
    error TEXT,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS token_costs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    request_id TEXT NOT NULL,
    cost_usd REAL NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS provider_status (
    provider TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    consecutive_failures INTEGER NOT NULL,
    consecutive_successes INTEGER NOT NULL,
    auto_disabled INTEGER NOT NULL,
    last_check_at TEXT,
    last_error TEXT
);

CREATE TABLE IF NOT EXISTS discussion_sessions (
    id TEXT PRIMARY KEY,
    topic TEXT NOT NULL,
    providers TEXT NOT NULL,
    status TEXT NOT NULL,
    parent_session_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS discussion_messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    round INTEGER NOT NULL,
    provider TEXT,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS discussion_templates (
    name TEXT PRIMARY KEY,
    prompt TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    provider TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    response TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_hit_at TEXT NOT NULL,
    hit_count INTEGER NOT NULL,
    PRIMARY KEY (provider, fingerprint)
);

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    hash TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_counters (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    misses INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO cache_counters (id, misses) VALUES (0, 0);

CREATE TABLE IF NOT EXISTS stream_entries (
    request_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    entry_type TEXT NOT NULL,
    content TEXT NOT NULL,
    is_final INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (request_id, timestamp)
);
CREATE INDEX IF NOT EXISTS idx_stream_entries_request_ts
    ON stream_entries (request_id, timestamp);
"#;

/// `sqlx`-backed [`StateStore`]. Schema is created on [`SqlStateStore::connect`]
/// so a fresh database file bootstraps itself with no external migration step.
pub struct SqlStateStore {
    pool: SqlitePool,
}

impl SqlStateStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn status_str(status: RequestStatus) -> &'static str {
        match status {
            RequestStatus::Queued => "queued",
            RequestStatus::Processing => "processing",
            RequestStatus::Retrying => "retrying",
            RequestStatus::Fallback => "fallback",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Timeout => "timeout",
        }
    }

    fn parse_status(s: &str) -> RequestStatus {
        match s {
            "processing" => RequestStatus::Processing,
            "retrying" => RequestStatus::Retrying,
            "fallback" => RequestStatus::Fallback,
            "completed" => RequestStatus::Completed,
            "failed" => RequestStatus::Failed,
            "cancelled" => RequestStatus::Cancelled,
            "timeout" => RequestStatus::Timeout,
            _ => RequestStatus::Queued,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Sql(e)
    }
}

#[async_trait]
impl StateStore for SqlStateStore {
    async fn create_request(&self, request: Request) -> StoreResult<()> {
        let metadata = serde_json::to_string(&request.metadata).unwrap_or_default();
        sqlx::query(
            "INSERT INTO requests (id, message, provider_hint, priority, status, backend_type, timeout_s, created_at, updated_at, started_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request.id.to_string())
        .bind(&request.message)
        .bind(&request.provider_hint)
        .bind(request.priority)
        .bind(Self::status_str(request.status))
        .bind(format!("{:?}", request.backend_type))
        .bind(request.timeout_s as i64)
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .bind(request.started_at.map(|t| t.to_rfc3339()))
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<Request>> {
        let row = sqlx::query(
            "SELECT id, message, provider_hint, priority, status, backend_type, timeout_s, created_at, updated_at, started_at, metadata
             FROM requests WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let status: String = row.try_get("status")?;
        let metadata_raw: String = row.try_get("metadata")?;
        let metadata: std::collections::HashMap<String, Value> =
            serde_json::from_str(&metadata_raw).unwrap_or_default();
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let started_at: Option<String> = row.try_get("started_at")?;
        Ok(Some(Request {
            id,
            message: row.try_get("message")?,
            provider_hint: row.try_get("provider_hint")?,
            priority: row.try_get("priority")?,
            status: Self::parse_status(&status),
            backend_type: gateway_core::model::BackendType::Single,
            timeout_s: row.try_get::<i64, _>("timeout_s")? as u64,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            started_at: started_at.and_then(|t| {
                DateTime::parse_from_rfc3339(&t).ok().map(|d| d.with_timezone(&Utc))
            }),
            metadata,
        }))
    }

    async fn update_request_status(&self, id: Uuid, status: RequestStatus) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE requests SET status = ?, updated_at = ?,
             started_at = CASE WHEN ? = 'processing' AND started_at IS NULL THEN ? ELSE started_at END
             WHERE id = ?",
        )
        .bind(Self::status_str(status))
        .bind(&now)
        .bind(Self::status_str(status))
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
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
        // Curated sample keeps this path simple: filter/sort in memory over
        // the id list, reusing get_request for row materialization.
        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM requests")
            .fetch_all(&self.pool)
            .await?;
        let mut rows = Vec::new();
        for (id,) in ids {
            if let Ok(uuid) = Uuid::parse_str(&id) {
                if let Some(req) = self.get_request(uuid).await? {
                    if filter.status.map_or(true, |s| req.status == s)
                        && filter
                            .provider
                            .as_ref()
                            .map_or(true, |p| req.provider_hint.as_deref() == Some(p.as_str()))
                    {
                        rows.push(req);
                    }
                }
            }
        }
        rows.sort_by_key(|r| r.created_at);
        if order == SortOrder::Desc {
            rows.reverse();
        }
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn cleanup_requests_older_than(&self, hours: i64) -> StoreResult<u64> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let result = sqlx::query("DELETE FROM requests WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_response(&self, response: Response) -> StoreResult<()> {
        let metadata = serde_json::to_string(&response.metadata).unwrap_or_default();
        sqlx::query(
            "INSERT OR REPLACE INTO responses
             (request_id, provider, content, latency_ms, cost_usd, input_tokens, output_tokens, cache_hit, retries,
              status, error, thinking, raw_output, metadata, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(response.request_id.to_string())
        .bind(&response.provider)
        .bind(&response.content)
        .bind(response.latency_ms as i64)
        .bind(response.cost_usd)
        .bind(response.input_tokens as i64)
        .bind(response.output_tokens as i64)
        .bind(response.cache_hit)
        .bind(response.retries as i64)
        .bind(Self::status_str(response.status))
        .bind(&response.error)
        .bind(&response.thinking)
        .bind(&response.raw_output)
        .bind(metadata)
        .bind(response.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_response(&self, request_id: Uuid) -> StoreResult<Option<Response>> {
        let row = sqlx::query(
            "SELECT provider, content, latency_ms, cost_usd, input_tokens, output_tokens, cache_hit, retries,
                    status, error, thinking, raw_output, metadata, completed_at
             FROM responses WHERE request_id = ?",
        )
        .bind(request_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let completed_at: String = row.try_get("completed_at")?;
        let status: String = row.try_get("status")?;
        let metadata_raw: String = row.try_get("metadata")?;
        let metadata: std::collections::HashMap<String, Value> =
            serde_json::from_str(&metadata_raw).unwrap_or_default();
        Ok(Some(Response {
            request_id,
            provider: row.try_get("provider")?,
            content: row.try_get("content")?,
            latency_ms: row.try_get::<i64, _>("latency_ms")? as u64,
            cost_usd: row.try_get("cost_usd")?,
            input_tokens: row.try_get::<i64, _>("input_tokens")? as u64,
            output_tokens: row.try_get::<i64, _>("output_tokens")? as u64,
            cache_hit: row.try_get("cache_hit")?,
            retries: row.try_get::<i64, _>("retries")? as u32,
            status: Self::parse_status(&status),
            error: row.try_get("error")?,
            thinking: row.try_get("thinking")?,
            raw_output: row.try_get("raw_output")?,
            metadata,
            completed_at: DateTime::parse_from_rfc3339(&completed_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn record_metric(
        &self,
        provider: &str,
        event_type: &str,
        latency_ms: u64,
        success: bool,
        error: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO metrics (provider, event_type, latency_ms, success, error, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(provider)
        .bind(event_type)
        .bind(latency_ms as i64)
        .bind(success)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            "INSERT INTO token_costs (provider, input_tokens, output_tokens, request_id, cost_usd, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(provider)
        .bind(input_tokens as i64)
        .bind(output_tokens as i64)
        .bind(request_id.to_string())
        .bind(cost_usd)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(cost_usd)
    }

    async fn cost_summary(&self, days: u32) -> StoreResult<CostSummary> {
        let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let row = sqlx::query(
            "SELECT COALESCE(SUM(cost_usd), 0.0) as cost, COALESCE(SUM(input_tokens), 0) as inp, COALESCE(SUM(output_tokens), 0) as outp
             FROM token_costs WHERE recorded_at >= ?",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(CostSummary {
            total_cost_usd: row.try_get("cost")?,
            input_tokens: row.try_get::<i64, _>("inp")? as u64,
            output_tokens: row.try_get::<i64, _>("outp")? as u64,
        })
    }

    async fn cost_by_provider(&self, days: u32) -> StoreResult<Vec<(String, CostSummary)>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let rows = sqlx::query(
            "SELECT provider, SUM(cost_usd) as cost, SUM(input_tokens) as inp, SUM(output_tokens) as outp
             FROM token_costs WHERE recorded_at >= ? GROUP BY provider",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok((
                    row.try_get("provider")?,
                    CostSummary {
                        total_cost_usd: row.try_get("cost")?,
                        input_tokens: row.try_get::<i64, _>("inp")? as u64,
                        output_tokens: row.try_get::<i64, _>("outp")? as u64,
                    },
                ))
            })
            .collect()
    }

    async fn cost_by_day(&self, days: u32) -> StoreResult<Vec<(DateTime<Utc>, CostSummary)>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let rows = sqlx::query(
            "SELECT substr(recorded_at, 1, 10) as day, SUM(cost_usd) as cost, SUM(input_tokens) as inp, SUM(output_tokens) as outp
             FROM token_costs WHERE recorded_at >= ? GROUP BY day ORDER BY day",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let day: String = row.try_get("day")?;
                let parsed = DateTime::parse_from_rfc3339(&format!("{day}T00:00:00Z"))
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Ok((
                    parsed,
                    CostSummary {
                        total_cost_usd: row.try_get("cost")?,
                        input_tokens: row.try_get::<i64, _>("inp")? as u64,
                        output_tokens: row.try_get::<i64, _>("outp")? as u64,
                    },
                ))
            })
            .collect()
    }

    async fn update_provider_status(&self, health: ProviderHealth) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO provider_status
             (provider, status, consecutive_failures, consecutive_successes, auto_disabled, last_check_at, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&health.provider)
        .bind(format!("{:?}", health.status))
        .bind(health.consecutive_failures as i64)
        .bind(health.consecutive_successes as i64)
        .bind(health.auto_disabled)
        .bind(health.last_check_at.map(|t| t.to_rfc3339()))
        .bind(&health.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_provider_status(&self, provider: &str) -> StoreResult<Option<ProviderHealth>> {
        let row = sqlx::query(
            "SELECT status, consecutive_failures, consecutive_successes, auto_disabled, last_check_at, last_error
             FROM provider_status WHERE provider = ?",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let status: String = row.try_get("status")?;
        let last_check_at: Option<String> = row.try_get("last_check_at")?;
        Ok(Some(ProviderHealth {
            provider: provider.to_string(),
            status: match status.as_str() {
                "Healthy" => ProviderStatus::Healthy,
                "Degraded" => ProviderStatus::Degraded,
                "Unavailable" => ProviderStatus::Unavailable,
                _ => ProviderStatus::Unknown,
            },
            consecutive_failures: row.try_get::<i64, _>("consecutive_failures")? as u32,
            consecutive_successes: row.try_get::<i64, _>("consecutive_successes")? as u32,
            auto_disabled: row.try_get("auto_disabled")?,
            last_check_at: last_check_at.and_then(|t| {
                DateTime::parse_from_rfc3339(&t).ok().map(|d| d.with_timezone(&Utc))
            }),
            last_error: row.try_get("last_error")?,
        }))
    }

    async fn create_session(&self, session: DiscussionSession) -> StoreResult<()> {
        self.update_session(session).await
    }

    async fn update_session(&self, session: DiscussionSession) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO discussion_sessions
             (id, topic, providers, status, parent_session_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(&session.topic)
        .bind(session.providers.join(","))
        .bind(format!("{:?}", session.status))
        .bind(session.parent_session_id.map(|id| id.to_string()))
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<DiscussionSession>> {
        let row = sqlx::query(
            "SELECT topic, providers, status, parent_session_id, created_at, updated_at
             FROM discussion_sessions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(Self::session_from_row(id, row)?))
    }

    async fn list_sessions(&self) -> StoreResult<Vec<DiscussionSession>> {
        let rows = sqlx::query(
            "SELECT id, topic, providers, status, parent_session_id, created_at, updated_at
             FROM discussion_sessions",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let id = Uuid::parse_str(&id).unwrap_or_default();
                Self::session_from_row(id, row)
            })
            .collect()
    }

    async fn create_message(&self, message: DiscussionMessage) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO discussion_messages (id, session_id, round, provider, role, content, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.session_id.to_string())
        .bind(message.round as i64)
        .bind(&message.provider)
        .bind(format!("{:?}", message.role))
        .bind(&message.content)
        .bind(format!("{:?}", message.status))
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_message(&self, id: Uuid, status: MessageStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE discussion_messages SET status = ? WHERE id = ?")
            .bind(format!("{status:?}"))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_messages(
        &self,
        session_id: Uuid,
        round: Option<u32>,
        provider: Option<&str>,
    ) -> StoreResult<Vec<DiscussionMessage>> {
        let rows = sqlx::query(
            "SELECT id, round, provider, role, content, status, created_at
             FROM discussion_messages WHERE session_id = ? ORDER BY round, created_at",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .filter_map(|row| {
                let row_round: i64 = row.try_get("round").ok()?;
                if round.map_or(false, |r| r as i64 != row_round) {
                    return None;
                }
                let row_provider: Option<String> = row.try_get("provider").ok()?;
                if provider.map_or(false, |p| row_provider.as_deref() != Some(p)) {
                    return None;
                }
                Some(Self::message_from_row(session_id, row))
            })
            .collect()
    }

    async fn cache_get(&self, provider: &str, fingerprint: &str) -> StoreResult<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT response, created_at, last_hit_at, hit_count FROM cache_entries
             WHERE provider = ? AND fingerprint = ?",
        )
        .bind(provider)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let hit_count: i64 = row.try_get("hit_count")?;
        let now = Utc::now();
        sqlx::query(
            "UPDATE cache_entries SET hit_count = ?, last_hit_at = ? WHERE provider = ? AND fingerprint = ?",
        )
        .bind(hit_count + 1)
        .bind(now.to_rfc3339())
        .bind(provider)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Some(CacheEntry {
            fingerprint: fingerprint.to_string(),
            provider: provider.to_string(),
            response: row.try_get("response")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(now),
            last_hit_at: now,
            hit_count: (hit_count + 1) as u64,
        }))
    }

    async fn cache_put(&self, entry: CacheEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries (provider, fingerprint, response, created_at, last_hit_at, hit_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.provider)
        .bind(&entry.fingerprint)
        .bind(&entry.response)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.last_hit_at.to_rfc3339())
        .bind(entry.hit_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cache_cleanup_expired(&self, ttl_s: u64) -> StoreResult<u64> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(ttl_s as i64)).to_rfc3339();
        let result = sqlx::query("DELETE FROM cache_entries WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn cache_enforce_max_entries(&self, max_entries: usize) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        let total = total as usize;
        if total <= max_entries {
            return Ok(0);
        }
        let to_remove = (total - max_entries) as i64;
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE rowid IN (
                SELECT rowid FROM cache_entries ORDER BY last_hit_at ASC LIMIT ?
             )",
        )
        .bind(to_remove)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cache_clear(&self, provider: Option<&str>) -> StoreResult<u64> {
        let result = match provider {
            Some(p) => {
                sqlx::query("DELETE FROM cache_entries WHERE provider = ?")
                    .bind(p)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM cache_entries").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn cache_record_miss(&self) -> StoreResult<()> {
        sqlx::query("UPDATE cache_counters SET misses = misses + 1 WHERE id = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cache_stats(&self) -> StoreResult<CacheStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) as total, COALESCE(SUM(hit_count), 0) as hits FROM cache_entries",
        )
        .fetch_one(&self.pool)
        .await?;
        let misses: i64 = sqlx::query_scalar("SELECT misses FROM cache_counters WHERE id = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(CacheStats {
            total_entries: row.try_get::<i64, _>("total")? as usize,
            total_hits: row.try_get::<i64, _>("hits")? as u64,
            total_misses: misses as u64,
        })
    }

    async fn cache_top_entries(&self, n: usize) -> StoreResult<Vec<CacheEntry>> {
        let rows = sqlx::query(
            "SELECT provider, fingerprint, response, created_at, last_hit_at, hit_count
             FROM cache_entries ORDER BY hit_count DESC LIMIT ?",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let created_at: String = row.try_get("created_at")?;
                let last_hit_at: String = row.try_get("last_hit_at")?;
                Ok(CacheEntry {
                    provider: row.try_get("provider")?,
                    fingerprint: row.try_get("fingerprint")?,
                    response: row.try_get("response")?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    last_hit_at: DateTime::parse_from_rfc3339(&last_hit_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    hit_count: row.try_get::<i64, _>("hit_count")? as u64,
                })
            })
            .collect()
    }

    async fn append_stream_entries(&self, entries: Vec<StreamEntry>) -> StoreResult<()> {
        for entry in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO stream_entries (request_id, chunk_index, entry_type, content, is_final, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(entry.request_id.to_string())
            .bind(entry.chunk_index as i64)
            .bind(format!("{:?}", entry.entry_type))
            .bind(&entry.content)
            .bind(entry.is_final)
            .bind(entry.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn stream_entries(&self, request_id: Uuid) -> StoreResult<Vec<StreamEntry>> {
        let rows = sqlx::query(
            "SELECT chunk_index, entry_type, content, is_final, timestamp
             FROM stream_entries WHERE request_id = ? ORDER BY timestamp",
        )
        .bind(request_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Self::stream_entry_from_row(request_id, row))
            .collect()
    }

    async fn search_thinking(&self, substring: &str) -> StoreResult<Vec<StreamEntry>> {
        let pattern = format!("%{}%", substring.to_lowercase());
        let rows = sqlx::query(
            "SELECT request_id, chunk_index, entry_type, content, is_final, timestamp
             FROM stream_entries WHERE lower(content) LIKE ?",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let request_id: String = row.try_get("request_id")?;
                let request_id = Uuid::parse_str(&request_id).unwrap_or_default();
                Self::stream_entry_from_row(request_id, row)
            })
            .collect()
    }

    async fn stats(&self) -> StoreResult<GatewayStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
            .fetch_one(&self.pool)
            .await?;
        let completed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE status = 'completed'")
                .fetch_one(&self.pool)
                .await?;
        let failed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;
        let cache = self.cache_stats().await?;
        let cache_hit_rate = if cache.total_hits + cache.total_misses == 0 {
            0.0
        } else {
            cache.total_hits as f64 / (cache.total_hits + cache.total_misses) as f64
        };
        Ok(GatewayStats {
            total_requests: total as u64,
            completed_requests: completed as u64,
            failed_requests: failed as u64,
            cache_hit_rate,
            queue_depth: 0,
            load_level: LoadLevel::Normal,
            uptime_s: 0,
        })
    }
}

impl SqlStateStore {
    fn session_from_row(id: Uuid, row: sqlx::sqlite::SqliteRow) -> StoreResult<DiscussionSession> {
        let providers: String = row.try_get("providers")?;
        let status: String = row.try_get("status")?;
        let parent: Option<String> = row.try_get("parent_session_id")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(DiscussionSession {
            id,
            topic: row.try_get("topic")?,
            providers: providers.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
            status: match status.as_str() {
                "Completed" => DiscussionStatus::Completed,
                "Failed" => DiscussionStatus::Failed,
                _ => DiscussionStatus::Active,
            },
            parent_session_id: parent.and_then(|p| Uuid::parse_str(&p).ok()),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn message_from_row(session_id: Uuid, row: sqlx::sqlite::SqliteRow) -> StoreResult<DiscussionMessage> {
        let id: String = row.try_get("id")?;
        let role: String = row.try_get("role")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(DiscussionMessage {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            session_id,
            round: row.try_get::<i64, _>("round")? as u32,
            provider: row.try_get("provider")?,
            role: match role.as_str() {
                "Summary" => MessageRole::Summary,
                "System" => MessageRole::System,
                _ => MessageRole::Provider,
            },
            content: row.try_get("content")?,
            status: match status.as_str() {
                "Delivered" => MessageStatus::Delivered,
                "Failed" => MessageStatus::Failed,
                _ => MessageStatus::Pending,
            },
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn stream_entry_from_row(request_id: Uuid, row: sqlx::sqlite::SqliteRow) -> StoreResult<StreamEntry> {
        let entry_type: String = row.try_get("entry_type")?;
        let timestamp: String = row.try_get("timestamp")?;
        Ok(StreamEntry {
            request_id,
            chunk_index: row.try_get::<i64, _>("chunk_index")? as u64,
            entry_type: match entry_type.as_str() {
                "Error" => StreamEntryType::Error,
                "Done" => StreamEntryType::Done,
                _ => StreamEntryType::Chunk,
            },
            content: row.try_get("content")?,
            is_final: row.try_get("is_final")?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
