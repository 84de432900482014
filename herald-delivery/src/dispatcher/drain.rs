//! Replay of requests deferred by the rate limiter

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use herald_common::tracing::{debug, info};

use super::Dispatcher;
use crate::types::{DeliveryState, Outcome, Request, StatusRecord};

/// Summary of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Requests dequeued and sent through the providers
    pub dispatched: usize,
    /// Of those, how many were accepted by a provider
    pub succeeded: usize,
    /// Requests still waiting for the next cycle
    pub remaining: usize,
    /// `true` if another drain was already dequeueing and this one did nothing
    pub skipped: bool,
}

impl DrainReport {
    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            dispatched: 0,
            succeeded: 0,
            remaining: 0,
            skipped: true,
        }
    }
}

/// Clears the in-flight flag however the dequeue step ends
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher {
    /// Dequeue as many requests as the rate limiter admits, marking each
    /// `processing`.
    ///
    /// Requests leave the queue in enqueue order. A denial by the rate limiter
    /// ends the step without re-queueing anything. Returns `None` if another
    /// dequeue step holds the drain flag.
    pub(super) fn take_admitted(&self) -> Option<Vec<Request>> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            debug!("Queue drain already in flight, skipping");
            return None;
        };

        if self.queue.is_empty() {
            return Some(Vec::new());
        }

        info!(
            queue_len = self.queue.len(),
            in_window = self.rate_limiter.in_window(),
            "Processing queue"
        );

        let mut batch = Vec::new();
        while !self.queue.is_empty() && self.rate_limiter.admit() {
            let Some(request) = self.queue.dequeue() else {
                break;
            };

            info!(key = %request.idempotency_key(), "Sending queued request");
            self.ledger.record(
                request.idempotency_key(),
                StatusRecord::new(DeliveryState::Processing),
            );
            batch.push(request);
        }

        Some(batch)
    }

    /// Run one dequeued request through the providers. Idempotency is not
    /// re-checked: the key was claimed when the request was queued.
    pub(super) async fn dispatch_queued(&self, request: Request) -> Outcome {
        self.dispatch(&request).await
    }

    /// Dequeue as many requests as the rate limiter admits and dispatch them,
    /// completing once every dequeued request has a terminal outcome.
    ///
    /// Only the dequeue step is exclusive; a second call made while another
    /// is still dispatching dequeues whatever the limiter admits by then.
    pub async fn drain_queue(&self) -> DrainReport {
        let Some(batch) = self.take_admitted() else {
            return DrainReport::skipped();
        };

        let dispatched = batch.len();
        let outcomes = join_all(batch.into_iter().map(|request| self.dispatch_queued(request))).await;

        DrainReport {
            dispatched,
            succeeded: outcomes.iter().filter(|outcome| outcome.is_success()).count(),
            remaining: self.queue.len(),
            skipped: false,
        }
    }
}
