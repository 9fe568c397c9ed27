//! Inbound event deduplication across instances
//!
//! Every instance may receive the same delivery. Before a handler runs, the
//! coordinator claims `msg_lock:<messageId>`; the claim is never released
//! explicitly so redeliveries inside the lock TTL are dropped.

use super::coordinator::InstanceCoordinator;
use crate::keys;
use std::future::Future;
use tracing::{debug, warn};

/// An inbound work item that carries a delivery-unique id
pub trait InboundEvent {
    fn message_id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome<T> {
    /// This instance claimed the event and ran the handler
    Processed(T),
    /// Another instance claimed it, or the claim could not be confirmed
    Duplicate,
}

impl<T> EventOutcome<T> {
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed(_))
    }

    pub fn into_processed(self) -> Option<T> {
        match self {
            Self::Processed(value) => Some(value),
            Self::Duplicate => None,
        }
    }
}

impl InstanceCoordinator {
    /// Run `handler` only if this instance wins the message lock
    ///
    /// Store errors while claiming count as a duplicate so an event is
    /// processed at most once. Events without an id cannot be deduplicated
    /// and are handled directly.
    pub async fn handle_event<E, F, Fut, T>(&self, event: &E, handler: F) -> EventOutcome<T>
    where
        E: InboundEvent + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let message_id = event.message_id();
        if message_id.trim().is_empty() {
            warn!(
                instance_id = %self.instance_id(),
                "Inbound event has no message id, handling without deduplication"
            );
            return EventOutcome::Processed(handler().await);
        }

        let key = keys::message_lock_key(message_id);
        if !self
            .try_lock_key(&key, self.settings().message_lock_ttl)
            .await
        {
            debug!(message_id = %message_id, "Event already claimed, skipping");
            return EventOutcome::Duplicate;
        }

        EventOutcome::Processed(handler().await)
    }
}
