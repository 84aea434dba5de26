//! Event taxonomy broadcast over the WebSocket bus (§4.13). Kept in
//! `gateway-core` so `gateway-engine` (producer) and `gateway-server`
//! (consumer) share one wire shape without depending on each other.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ProviderStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    RequestSubmitted { request_id: Uuid },
    RequestProcessing { request_id: Uuid, provider: String },
    RequestCompleted { request_id: Uuid, provider: String, latency_ms: u64 },
    RequestFailed { request_id: Uuid, error: String },
    RequestCancelled { request_id: Uuid },
    RequestRetrying { request_id: Uuid, provider: String, attempt: u32 },
    RequestFallback { request_id: Uuid, from: String, to: String },
    ProviderStatusChanged { provider: String, status: ProviderStatus },
    StreamChunk { request_id: Uuid, chunk_index: u64, is_final: bool },
    DiscussionRoundCompleted { session_id: Uuid, round: u32 },
    DiscussionCompleted { session_id: Uuid },
    DiscussionFailed { session_id: Uuid },
}
