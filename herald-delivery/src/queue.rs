//! Delivery queue for requests deferred by rate limiting

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::types::{IdempotencyKey, Request};

/// FIFO holding area for deferred requests.
///
/// Requests leave in exactly the order they arrived and exactly once.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    queue: Mutex<VecDeque<Request>>,
}

impl DeliveryQueue {
    /// Create a new empty delivery queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request to the tail of the queue
    pub fn enqueue(&self, request: Request) {
        self.queue.lock().push_back(request);
    }

    /// Remove and return the request at the head of the queue
    pub fn dequeue(&self) -> Option<Request> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Keys of every queued request, head first
    pub fn keys(&self) -> Vec<IdempotencyKey> {
        self.queue
            .lock()
            .iter()
            .map(|request| request.idempotency_key().clone())
            .collect()
    }
}
