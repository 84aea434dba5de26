//! StreamManager (C10): per-request append-only stream log, batched
//! writes, and SSE frame assembly (§4.10).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use gateway_core::model::{StreamEntry, StreamEntryType};
use gateway_store::StateStore;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A single SSE frame: `data: {json}\n\n`, with the stream terminated by
/// a frame carrying `is_final: true`.
#[derive(Debug, Clone, Serialize)]
pub struct SseFrame {
    pub chunk_index: u64,
    pub content: String,
    pub is_final: bool,
}

impl SseFrame {
    pub fn to_sse_line(&self) -> String {
        format!("data: {}\n\n", serde_json::to_string(self).unwrap_or_default())
    }
}

struct StreamState {
    buffer: Vec<StreamEntry>,
    next_index: u64,
}

/// Buffers stream entries per request and flushes them to the
/// [`StateStore`] in batches (default 10), on close, or on shutdown.
pub struct StreamManager {
    store: Arc<dyn StateStore>,
    batch_size: usize,
    buffers: Mutex<HashMap<Uuid, StreamState>>,
}

impl StreamManager {
    pub fn new(store: Arc<dyn StateStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, request_id: Uuid, provider: &str) {
        self.push(request_id, StreamEntryType::Chunk, format!("start:{provider}"), false)
            .await;
    }

    pub async fn push_chunk(&self, request_id: Uuid, content: String) -> SseFrame {
        self.push(request_id, StreamEntryType::Chunk, content.clone(), false).await;
        let index = {
            let buffers = self.buffers.lock().await;
            buffers.get(&request_id).map(|s| s.next_index - 1).unwrap_or(0)
        };
        SseFrame {
            chunk_index: index,
            content,
            is_final: false,
        }
    }

    pub async fn complete(&self, request_id: Uuid, success: bool) -> SseFrame {
        self.push(
            request_id,
            StreamEntryType::Done,
            format!("complete:success={success}"),
            true,
        )
        .await;
        self.flush(request_id).await;
        SseFrame {
            chunk_index: u64::MAX,
            content: String::new(),
            is_final: true,
        }
    }

    async fn push(&self, request_id: Uuid, entry_type: StreamEntryType, content: String, is_final: bool) {
        let mut buffers = self.buffers.lock().await;
        let state = buffers.entry(request_id).or_insert(StreamState {
            buffer: Vec::new(),
            next_index: 0,
        });
        let entry = StreamEntry {
            request_id,
            chunk_index: state.next_index,
            entry_type,
            content,
            is_final,
            timestamp: Utc::now(),
        };
        state.next_index += 1;
        state.buffer.push(entry);
        if state.buffer.len() >= self.batch_size {
            let to_flush = std::mem::take(&mut state.buffer);
            drop(buffers);
            let _ = self.store.append_stream_entries(to_flush).await;
        }
    }

    pub async fn flush(&self, request_id: Uuid) {
        let mut buffers = self.buffers.lock().await;
        if let Some(state) = buffers.get_mut(&request_id) {
            if !state.buffer.is_empty() {
                let to_flush = std::mem::take(&mut state.buffer);
                drop(buffers);
                let _ = self.store.append_stream_entries(to_flush).await;
            }
        }
        self.buffers.lock().await.remove(&request_id);
    }

    /// Flushes every still-buffered request; call on component shutdown
    /// per §4.1's failure semantics.
    pub async fn flush_all(&self) {
        let ids: Vec<Uuid> = self.buffers.lock().await.keys().copied().collect();
        for id in ids {
            self.flush(id).await;
        }
    }

    pub async fn tail(&self, request_id: Uuid) -> Vec<StreamEntry> {
        self.store.stream_entries(request_id).await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::InMemoryStateStore;

    #[tokio::test]
    async fn batches_flush_at_threshold() {
        let store = Arc::new(InMemoryStateStore::new());
        let mgr = StreamManager::new(store.clone(), 2);
        let id = Uuid::new_v4();
        mgr.push_chunk(id, "a".into()).await;
        assert!(mgr.tail(id).await.is_empty());
        mgr.push_chunk(id, "b".into()).await;
        assert_eq!(mgr.tail(id).await.len(), 2);
    }

    #[tokio::test]
    async fn complete_flushes_remaining_and_marks_final() {
        let store = Arc::new(InMemoryStateStore::new());
        let mgr = StreamManager::new(store, 10);
        let id = Uuid::new_v4();
        mgr.push_chunk(id, "a".into()).await;
        let frame = mgr.complete(id, true).await;
        assert!(frame.is_final);
        let entries = mgr.tail(id).await;
        assert_eq!(entries.len(), 2);
        assert!(entries.last().unwrap().is_final);
    }

    #[test]
    fn sse_frame_serializes_as_data_line() {
        let frame = SseFrame {
            chunk_index: 3,
            content: "hi".into(),
            is_final: false,
        };
        let line = frame.to_sse_line();
        assert!(line.starts_with("data: "));
        assert!(line.ends_with("\n\n"));
        assert!(line.contains("\"chunk_index\":3"));
    }
}
