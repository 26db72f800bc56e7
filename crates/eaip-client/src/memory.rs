//! In-process broker for tests and local wiring.
//!
//! Every [`MemoryTransport`] connected to the same [`MemoryBroker`] receives
//! the messages published by any of them, synchronously on the publishing
//! thread. Retained messages are replayed to new matching subscriptions.
//!
//! Deliveries and retained replays are serialized broker-wide, so a new
//! subscriber never sees a retained value after a newer one was delivered.
//! The lock is reentrant: handlers may publish or subscribe while handling.

use crate::filter::TopicFilter;
use crate::registry::{self, SubscriptionRegistry};
use crate::transport::{Handler, PubSubTransport, TransportError};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// A message accepted by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Publishing client
    pub client_id: String,
    /// Concrete topic
    pub topic: String,
    /// Payload
    pub payload: String,
    /// Retain flag
    pub retain: bool,
}

#[derive(Default)]
struct BrokerState {
    retained: BTreeMap<String, String>,
    clients: Vec<Weak<SubscriptionRegistry>>,
    published: Vec<PublishedMessage>,
    offline: bool,
}

/// Shared in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    delivery: Arc<ReentrantMutex<()>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new client.
    #[must_use]
    pub fn connect(&self, client_id: impl Into<String>) -> MemoryTransport {
        let registry = Arc::new(SubscriptionRegistry::new());
        self.state.lock().clients.push(Arc::downgrade(&registry));

        MemoryTransport {
            client_id: client_id.into(),
            broker: self.clone(),
            registry,
        }
    }

    /// Make every following operation fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// All messages published through connected transports, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    /// Payloads published to `topic`, oldest first.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|msg| msg.topic == topic)
            .map(|msg| msg.payload.clone())
            .collect()
    }

    /// Retained payload stored for `topic`.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state.lock().retained.get(topic).cloned()
    }

    /// Deliver a message from outside any connected client.
    ///
    /// Returns the number of handlers invoked.
    pub fn inject(&self, topic: &str, payload: &str) -> usize {
        let _serial = self.delivery.lock();
        self.deliver(topic, payload)
    }

    fn deliver(&self, topic: &str, payload: &str) -> usize {
        let registries: Vec<Arc<SubscriptionRegistry>> = {
            let mut state = self.state.lock();
            state.clients.retain(|client| client.strong_count() > 0);
            state.clients.iter().filter_map(Weak::upgrade).collect()
        };

        registries
            .iter()
            .map(|registry| registry.dispatch(topic, payload))
            .sum()
    }
}

/// A client attached to a [`MemoryBroker`].
pub struct MemoryTransport {
    client_id: String,
    broker: MemoryBroker,
    registry: Arc<SubscriptionRegistry>,
}

impl MemoryTransport {
    /// Local subscriptions of this client.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

impl PubSubTransport for MemoryTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        let _serial = self.broker.delivery.lock();
        {
            let mut state = self.broker.state.lock();
            if state.offline {
                return Err(TransportError::Publish(format!("{topic}: broker offline")));
            }
            state.published.push(PublishedMessage {
                client_id: self.client_id.clone(),
                topic: topic.to_string(),
                payload: payload.to_string(),
                retain,
            });
            if retain {
                state.retained.insert(topic.to_string(), payload.to_string());
            }
        }

        self.broker.deliver(topic, payload);
        Ok(())
    }

    fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), TransportError> {
        let _serial = self.broker.delivery.lock();

        let replay = {
            let state = self.broker.state.lock();
            if state.offline {
                return Err(TransportError::Subscribe(format!("{filter}: broker offline")));
            }

            let compiled = TopicFilter::new(filter)?;
            let replay: Vec<(String, String)> = state
                .retained
                .iter()
                .filter(|(topic, _)| compiled.matches(topic))
                .map(|(topic, payload)| (topic.clone(), payload.clone()))
                .collect();
            self.registry.replace(compiled, Arc::clone(&handler));
            replay
        };

        for (topic, payload) in &replay {
            registry::invoke(&handler, topic, payload);
        }

        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        if self.broker.state.lock().offline {
            return Err(TransportError::Unsubscribe(format!(
                "{filter}: broker offline"
            )));
        }

        self.registry.unsubscribe(filter)
    }
}
