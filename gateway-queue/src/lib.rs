//! RequestQueue (C2): priority FIFO keyed by `(priority desc, created_at
//! asc)`, with a concurrency cap the LifecycleEngine respects when
//! dequeuing (§4.2, §5).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gateway_core::model::Request;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QueuedRequest(Request);

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.created_at == other.0.created_at
    }
}
impl Eq for QueuedRequest {}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first, and among equal
        // priorities the *older* request should pop first, so we invert
        // the created_at comparison.
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default, Clone)]
pub struct QueueStats {
    pub queue_depth: usize,
    pub processing_count: usize,
    pub max_concurrent: usize,
    pub by_provider: HashMap<String, usize>,
}

struct Inner {
    heap: BinaryHeap<QueuedRequest>,
    queued_ids: HashMap<Uuid, DateTime<Utc>>,
    processing: HashMap<Uuid, Request>,
}

/// Priority FIFO queue. `dequeue` suspends on a [`Notify`] rather than
/// polling, matching the blocking suspension point required by §5.
pub struct RequestQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_queue_depth: usize,
    max_concurrent: AtomicUsize,
    shutting_down: AtomicBool,
}

impl RequestQueue {
    pub fn new(max_queue_depth: usize, max_concurrent: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                queued_ids: HashMap::new(),
                processing: HashMap::new(),
            }),
            notify: Notify::new(),
            max_queue_depth,
            max_concurrent: AtomicUsize::new(max_concurrent),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn set_max_concurrent(&self, value: usize) {
        self.max_concurrent.store(value, AtomicOrdering::Relaxed);
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(AtomicOrdering::Relaxed)
    }

    /// Fails if total depth (queued + processing) is at or above
    /// `max_queue_depth`.
    pub async fn enqueue(&self, request: Request) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.heap.len() + inner.processing.len() >= self.max_queue_depth {
            return false;
        }
        inner.queued_ids.insert(request.id, request.created_at);
        inner.heap.push(QueuedRequest(request));
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Blocks until a request is available. Returns `None` only after
    /// `shutdown` has been observed with an empty queue.
    pub async fn dequeue(&self) -> Option<Request> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(QueuedRequest(req)) = inner.heap.pop() {
                    inner.queued_ids.remove(&req.id);
                    inner.processing.insert(req.id, req.clone());
                    return Some(req);
                }
            }
            if self.shutting_down.load(AtomicOrdering::Relaxed) {
                return None;
            }
            self.notify.notified().await;
            if self.shutting_down.load(AtomicOrdering::Relaxed) {
                let mut inner = self.inner.lock().await;
                if let Some(QueuedRequest(req)) = inner.heap.pop() {
                    inner.queued_ids.remove(&req.id);
                    inner.processing.insert(req.id, req.clone());
                    return Some(req);
                }
                return None;
            }
        }
    }

    pub async fn mark_completed(&self, id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(&id);
    }

    /// Removes from the queue if still queued; returns `true` if it was
    /// found there. If already processing, the caller is responsible for
    /// signaling cancellation to the running task (§5) — this method
    /// leaves processing entries untouched.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.queued_ids.remove(&id).is_some() {
            inner.heap.retain(|q| q.0.id != id);
            return true;
        }
        false
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let mut by_provider: HashMap<String, usize> = HashMap::new();
        for QueuedRequest(req) in inner.heap.iter() {
            if let Some(p) = &req.provider_hint {
                *by_provider.entry(p.clone()).or_insert(0) += 1;
            }
        }
        QueueStats {
            queue_depth: inner.heap.len(),
            processing_count: inner.processing.len(),
            max_concurrent: self.max_concurrent(),
            by_provider,
        }
    }

    /// Wakes every waiter so they can observe shutdown and exit cleanly.
    /// Already-queued requests are still drained before `dequeue` starts
    /// returning `None`.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, AtomicOrdering::Relaxed);
        self.notify.notify_waiters();
    }
}

pub type SharedRequestQueue = Arc<RequestQueue>;

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::model::{BackendType, RequestStatus};
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn req(priority: i32) -> Request {
        Request {
            id: Uuid::new_v4(),
            message: "hi".into(),
            provider_hint: None,
            priority,
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
    async fn higher_priority_dequeues_first() {
        let q = RequestQueue::new(100, 10);
        let low = req(10);
        let high = req(90);
        assert!(q.enqueue(low.clone()).await);
        assert!(q.enqueue(high.clone()).await);
        let first = q.dequeue().await.unwrap();
        assert_eq!(first.id, high.id);
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = RequestQueue::new(100, 10);
        let first = req(50);
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = req(50);
        q.enqueue(first.clone()).await;
        q.enqueue(second.clone()).await;
        let popped = q.dequeue().await.unwrap();
        assert_eq!(popped.id, first.id);
    }

    #[tokio::test]
    async fn enqueue_rejects_beyond_max_depth() {
        let q = RequestQueue::new(1, 10);
        assert!(q.enqueue(req(1)).await);
        assert!(!q.enqueue(req(1)).await);
    }

    #[tokio::test]
    async fn cancel_removes_queued_request() {
        let q = RequestQueue::new(10, 10);
        let r = req(1);
        q.enqueue(r.clone()).await;
        assert!(q.cancel(r.id).await);
        let stats = q.stats().await;
        assert_eq!(stats.queue_depth, 0);
    }

    #[tokio::test]
    async fn dequeue_blocks_until_enqueue() {
        let q = Arc::new(RequestQueue::new(10, 10));
        let q2 = q.clone();
        let r = req(1);
        let r_id = r.id;
        let handle = tokio::spawn(async move { q2.dequeue().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.enqueue(r).await;
        let got = handle.await.unwrap().unwrap();
        assert_eq!(got.id, r_id);
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_dequeue_with_none() {
        let q = Arc::new(RequestQueue::new(10, 10));
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.dequeue().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.shutdown();
        assert!(handle.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_still_drains_queued_requests() {
        let q = RequestQueue::new(10, 10);
        let r = req(1);
        let r_id = r.id;
        q.enqueue(r).await;
        q.shutdown();
        let got = q.dequeue().await.unwrap();
        assert_eq!(got.id, r_id);
        assert!(q.dequeue().await.is_none());
    }
}
