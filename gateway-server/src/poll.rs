//! Single polling helper used by every "wait for a terminal status"
//! endpoint (`POST /api/ask?wait=true`, `GET /api/reply/{id}?wait=true`,
//! batch status/reply) so the backoff curve only lives in one place.

use std::time::Duration;

use gateway_core::model::Request;
use gateway_store::StateStore;
use uuid::Uuid;

const INITIAL_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 1000;
const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Polls the store until `request_id` reaches a terminal status or
/// `timeout` elapses, using an exponentially growing sleep between
/// checks. Returns the last-seen `Request` row, which may still be
/// non-terminal if the deadline was hit.
pub async fn poll_until_terminal(
    store: &dyn StateStore,
    request_id: Uuid,
    timeout: Duration,
) -> Result<Option<Request>, gateway_store::StoreError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        let request = store.get_request(request_id).await?;
        match &request {
            Some(req) if req.status.is_terminal() => return Ok(request),
            None => return Ok(None),
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(request);
        }
        let sleep_for = Duration::from_millis(backoff_ms).min(deadline.saturating_duration_since(tokio::time::Instant::now()));
        tokio::time::sleep(sleep_for).await;
        backoff_ms = ((backoff_ms as f64) * BACKOFF_MULTIPLIER) as u64;
        backoff_ms = backoff_ms.min(MAX_BACKOFF_MS);
    }
}
