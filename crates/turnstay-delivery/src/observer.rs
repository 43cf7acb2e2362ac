//! Attempt observers.
//!
//! The retry loop reports each attempt twice: when it is sent (outcome
//! `Pending`) and when it closes. Observers must not block delivery; they
//! cannot fail it either, since the trait returns nothing.

use std::sync::Arc;

use async_trait::async_trait;
use turnstay_core::EventId;

use crate::attempt::DeliveryAttempt;

/// Receives delivery attempts as they happen.
#[async_trait]
pub trait AttemptObserver: Send + Sync + std::fmt::Debug {
    /// Called when an attempt is sent.
    async fn attempt_started(&self, _event_id: &EventId, _attempt: &DeliveryAttempt) {}

    /// Called when an attempt reaches its final outcome.
    async fn attempt_finished(&self, event_id: &EventId, attempt: &DeliveryAttempt);
}

/// Observer that discards all attempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

#[async_trait]
impl AttemptObserver for NoOpObserver {
    async fn attempt_finished(&self, _event_id: &EventId, _attempt: &DeliveryAttempt) {}
}

/// Forwards attempts to several observers concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastObserver {
    observers: Vec<Arc<dyn AttemptObserver>>,
}

impl MulticastObserver {
    /// Creates a multicast observer with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn add_observer(&mut self, observer: Arc<dyn AttemptObserver>) {
        self.observers.push(observer);
    }

    /// Number of registered subscribers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

#[async_trait]
impl AttemptObserver for MulticastObserver {
    async fn attempt_started(&self, event_id: &EventId, attempt: &DeliveryAttempt) {
        let futures = self.observers.iter().map(|o| o.attempt_started(event_id, attempt));
        futures::future::join_all(futures).await;
    }

    async fn attempt_finished(&self, event_id: &EventId, attempt: &DeliveryAttempt) {
        let futures = self.observers.iter().map(|o| o.attempt_finished(event_id, attempt));
        futures::future::join_all(futures).await;
    }
}
