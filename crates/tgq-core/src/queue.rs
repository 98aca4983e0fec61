use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::Notify;

use crate::domain::{canonicalize, DeliveryRequest};

/// FIFO of pending telegrams shared by every producer and the one scheduler.
///
/// `enqueue` appends at the tail, `dequeue` takes the oldest entry from the head.
#[derive(Clone, Default)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    items: Mutex<VecDeque<DeliveryRequest>>,
    ready: Notify,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request: DeliveryRequest) {
        self.lock().push_back(request);
        self.inner.ready.notify_one();
    }

    pub fn dequeue(&self) -> Option<DeliveryRequest> {
        self.lock().pop_front()
    }

    /// Put back a request that was dequeued but never attempted, ahead of the rest.
    pub fn restore(&self, request: DeliveryRequest) {
        self.lock().push_front(request);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pending requests, oldest first.
    pub fn snapshot(&self) -> Vec<DeliveryRequest> {
        self.lock().iter().cloned().collect()
    }

    /// Resolves after the next `enqueue` (or immediately if one happened unobserved).
    pub async fn ready(&self) {
        self.inner.ready.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DeliveryRequest>> {
        self.inner.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Canonical recipients successfully delivered to during this process.
#[derive(Clone, Default)]
pub struct SentLedger {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, recipient: &str) {
        self.lock().insert(canonicalize(recipient));
    }

    pub fn contains(&self, recipient: &str) -> bool {
        self.lock().contains(&canonicalize(recipient))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lock().iter().cloned().collect();
        out.sort();
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Template;

    fn req(to: &str) -> DeliveryRequest {
        DeliveryRequest::new(Template::new("secret", "1"), to)
    }

    #[test]
    fn dequeues_oldest_first() {
        let q = DeliveryQueue::new();
        q.enqueue(req("r1"));
        q.enqueue(req("r2"));
        q.enqueue(req("r3"));

        let order: Vec<_> = std::iter::from_fn(|| q.dequeue())
            .map(|r| r.recipient)
            .collect();
        assert_eq!(order, vec!["r1", "r2", "r3"]);
        assert!(q.is_empty());
    }

    #[test]
    fn clones_share_the_same_queue() {
        let q = DeliveryQueue::new();
        let producer = q.clone();
        producer.enqueue(req("a"));
        assert_eq!(q.len(), 1);
        assert_eq!(q.snapshot()[0].recipient, "a");
    }

    #[test]
    fn restored_request_is_next_out() {
        let q = DeliveryQueue::new();
        q.enqueue(req("r1"));
        q.enqueue(req("r2"));
        let first = q.dequeue().unwrap();
        q.restore(first);
        assert_eq!(q.dequeue().unwrap().recipient, "r1");
        assert_eq!(q.dequeue().unwrap().recipient, "r2");
    }

    #[test]
    fn ledger_compares_canonical_forms() {
        let ledger = SentLedger::new();
        ledger.record("New Provi");
        assert!(ledger.contains("new_provi"));
        assert!(ledger.contains("NEW PROVI"));
        ledger.record("new_provi");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.snapshot(), vec!["new_provi"]);
    }

    #[tokio::test]
    async fn ready_wakes_after_enqueue() {
        let q = DeliveryQueue::new();
        q.enqueue(req("a"));
        // permit stored by notify_one, so this returns immediately
        q.ready().await;
        assert_eq!(q.len(), 1);
    }
}
