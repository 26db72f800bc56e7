//! Subscription registry routing incoming messages to handlers.

use crate::filter::TopicFilter;
use crate::transport::{Handler, TransportError};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};

struct Subscription {
    filter: TopicFilter,
    handler: Handler,
}

/// Active subscriptions in registration order.
///
/// Dispatch matches against a snapshot taken under the read lock and runs
/// handlers after releasing it, so handlers may subscribe or unsubscribe
/// without deadlocking.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `filter`.
    ///
    /// An existing entry for the same filter keeps its position and gets the
    /// new handler.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidFilter`] if the filter does not compile.
    pub fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), TransportError> {
        self.replace(TopicFilter::new(filter)?, handler);
        Ok(())
    }

    /// Register `handler` for an already compiled filter.
    ///
    /// Returns the handler previously registered for the same filter, whose
    /// entry keeps its dispatch position.
    pub fn replace(&self, filter: TopicFilter, handler: Handler) -> Option<Handler> {
        let mut subscriptions = self.subscriptions.write();

        if let Some(existing) = subscriptions
            .iter_mut()
            .find(|sub| sub.filter.as_str() == filter.as_str())
        {
            tracing::debug!(filter = filter.as_str(), "Replacing subscription handler");
            return Some(std::mem::replace(&mut existing.handler, handler));
        }

        tracing::debug!(filter = filter.as_str(), "Adding subscription");
        subscriptions.push(Subscription { filter, handler });
        None
    }

    /// Remove the entry for `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotSubscribed`] if no entry exists; the
    /// registry is left unchanged.
    pub fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        let mut subscriptions = self.subscriptions.write();
        let position = subscriptions
            .iter()
            .position(|sub| sub.filter.as_str() == filter)
            .ok_or_else(|| TransportError::NotSubscribed(filter.to_string()))?;

        subscriptions.remove(position);
        tracing::debug!(filter, "Removed subscription");
        Ok(())
    }

    /// Whether `filter` is registered.
    #[must_use]
    pub fn contains(&self, filter: &str) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|sub| sub.filter.as_str() == filter)
    }

    /// Registered filters in dispatch order.
    #[must_use]
    pub fn filters(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .iter()
            .map(|sub| sub.filter.as_str().to_string())
            .collect()
    }

    /// Number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether no filter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Handlers whose filter matches `topic`, in registration order.
    #[must_use]
    pub fn matching(&self, topic: &str) -> Vec<Handler> {
        self.subscriptions
            .read()
            .iter()
            .filter(|sub| sub.filter.matches(topic))
            .map(|sub| sub.handler.clone())
            .collect()
    }

    /// Invoke every handler whose filter matches `topic`.
    ///
    /// A panicking handler is logged and does not stop delivery to the
    /// remaining handlers. Returns the number of handlers invoked.
    pub fn dispatch(&self, topic: &str, payload: &str) -> usize {
        let handlers = self.matching(topic);

        tracing::debug!(
            topic,
            payload_len = payload.len(),
            handlers = handlers.len(),
            "Dispatching message"
        );

        for handler in &handlers {
            invoke(handler, topic, payload);
        }

        handlers.len()
    }
}

/// Run a handler, containing any panic it raises.
pub(crate) fn invoke(handler: &Handler, topic: &str, payload: &str) {
    if panic::catch_unwind(AssertUnwindSafe(|| handler(topic, payload))).is_err() {
        tracing::warn!(topic, "Subscription handler panicked");
    }
}
