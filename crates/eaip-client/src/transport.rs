//! Capability interface of the underlying pub/sub transport.

use std::sync::Arc;

/// Callback invoked with `(topic, payload)` for every matching message.
pub type Handler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A pub/sub transport usable by the protocol layer.
///
/// All calls return once the transport accepted or rejected the request.
/// Handlers run on whichever thread the transport delivers messages on.
pub trait PubSubTransport: Send + Sync {
    /// Client id the transport is connected with.
    fn client_id(&self) -> &str;

    /// Publish a payload to a concrete topic.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Publish`] if the transport rejects the message.
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError>;

    /// Register `handler` for every topic matching `filter`.
    ///
    /// Subscribing an already subscribed filter replaces its handler.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Subscribe`] if the transport rejects the
    /// subscription, or [`TransportError::InvalidFilter`] if the filter
    /// cannot be compiled.
    fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), TransportError>;

    /// Remove the handler registered for `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotSubscribed`] if the filter is not
    /// registered, or [`TransportError::Unsubscribe`] if the transport
    /// rejects the request.
    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;
}

impl<T: PubSubTransport + ?Sized> PubSubTransport for Arc<T> {
    fn client_id(&self) -> &str {
        (**self).client_id()
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        (**self).publish(topic, payload, retain)
    }

    fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), TransportError> {
        (**self).subscribe(filter, handler)
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        (**self).unsubscribe(filter)
    }
}

/// Errors reported by transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Subscription failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Unsubscription failed
    #[error("unsubscribe error: {0}")]
    Unsubscribe(String),
    /// Filter was never subscribed
    #[error("not subscribed: {0}")]
    NotSubscribed(String),
    /// Filter could not be compiled
    #[error("invalid topic filter '{filter}': {reason}")]
    InvalidFilter {
        /// Offending filter
        filter: String,
        /// Compilation error
        reason: String,
    },
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),
}
