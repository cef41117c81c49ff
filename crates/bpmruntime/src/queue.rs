use bpmcore::{ProcessError, StartRequest};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Pending start requests waiting for (or undergoing) dispatch.
///
/// Producers call [`RequestQueue::enqueue`] from any task; a single consumer
/// obtains the notification stream through [`RequestQueue::subscribe`].
/// Requests stay visible in [`RequestQueue::pending`] until dequeued.
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    pending: Vec<StartRequest>,
    sender: mpsc::UnboundedSender<StartRequest>,
    receiver: Option<mpsc::UnboundedReceiver<StartRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(QueueInner {
                pending: Vec::new(),
                sender,
                receiver: Some(receiver),
            }),
        }
    }

    /// Append a request and notify the consumer; returns the request id
    pub fn enqueue(&self, request: StartRequest) -> Uuid {
        let request_id = request.request_id;
        let mut inner = self.lock();

        // Notify under the lock so notification order matches insertion order
        inner.pending.push(request.clone());
        if inner.sender.send(request).is_err() {
            tracing::warn!(%request_id, "request queued but no dispatcher is listening");
        }
        tracing::debug!(%request_id, backlog = inner.pending.len(), "request enqueued");
        request_id
    }

    /// Remove a specific request
    pub fn dequeue(&self, request_id: Uuid) -> Option<StartRequest> {
        let mut inner = self.lock();
        let position = inner
            .pending
            .iter()
            .position(|r| r.request_id == request_id)?;
        Some(inner.pending.remove(position))
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn contains(&self, request_id: Uuid) -> bool {
        self.lock().pending.iter().any(|r| r.request_id == request_id)
    }

    /// Snapshot of pending requests in insertion order
    pub fn pending(&self) -> Vec<StartRequest> {
        self.lock().pending.clone()
    }

    /// Take the notification stream. Only one consumer may subscribe.
    pub fn subscribe(&self) -> Result<RequestStream, ProcessError> {
        self.lock()
            .receiver
            .take()
            .map(|receiver| RequestStream { receiver })
            .ok_or(ProcessError::QueueAlreadySubscribed)
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Added-request notifications, in enqueue order
pub struct RequestStream {
    receiver: mpsc::UnboundedReceiver<StartRequest>,
}

impl RequestStream {
    /// Next enqueued request; `None` once the queue is dropped
    pub async fn recv(&mut self) -> Option<StartRequest> {
        self.receiver.recv().await
    }

    /// Next request if one is already waiting
    pub fn try_recv(&mut self) -> Option<StartRequest> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn enqueue_dequeue_tracks_backlog() {
        let queue = RequestQueue::new();
        let first = queue.enqueue(StartRequest::new("p1", json!({})));
        let second = queue.enqueue(StartRequest::new("p2", json!({})));
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(first));

        let removed = queue.dequeue(first).unwrap();
        assert_eq!(removed.process_public_id, "p1");
        assert!(queue.dequeue(first).is_none());
        assert_eq!(queue.pending()[0].request_id, second);
    }

    #[test]
    fn only_one_subscriber() {
        let queue = RequestQueue::new();
        assert!(queue.subscribe().is_ok());
        assert_eq!(
            queue.subscribe().err(),
            Some(ProcessError::QueueAlreadySubscribed)
        );
    }

    #[tokio::test]
    async fn notifications_follow_insertion_order() {
        let queue = RequestQueue::new();
        let mut stream = queue.subscribe().unwrap();
        let ids: Vec<Uuid> = (0..5)
            .map(|i| queue.enqueue(StartRequest::new(format!("p{}", i), json!({}))))
            .collect();

        for id in ids {
            assert_eq!(stream.recv().await.unwrap().request_id, id);
        }
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_are_each_observed_once() {
        let queue = Arc::new(RequestQueue::new());
        let mut stream = queue.subscribe().unwrap();

        let mut producers = Vec::new();
        for producer in 0..8 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                (0..25)
                    .map(|i| {
                        queue.enqueue(StartRequest::new(format!("p{}-{}", producer, i), json!({})))
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut expected = HashSet::new();
        for producer in producers {
            expected.extend(producer.await.unwrap());
        }

        let mut seen = HashSet::new();
        while let Some(request) = stream.try_recv() {
            assert!(seen.insert(request.request_id), "request observed twice");
        }
        assert_eq!(seen, expected);
        assert_eq!(queue.len(), 200);
    }
}
