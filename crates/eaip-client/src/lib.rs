//! # elastic-AI Protocol Client
//!
//! Client side of the elastic-AI protocol on top of a pub/sub transport.
//!
//! This crate provides:
//! - Wildcard topic filters compiled once per subscription
//! - A subscription registry routing incoming messages to handlers
//! - The [`Protocol`] facade for status, data, start/stop and command channels
//! - A [`DataRequester`] session pulling one remote data stream
//! - Transports: an in-memory broker and an MQTT client

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod filter;
pub mod memory;
pub mod mqtt;
pub mod protocol;
pub mod registry;
pub mod requester;
pub mod transport;

pub use filter::TopicFilter;
pub use memory::{MemoryBroker, MemoryTransport, PublishedMessage};
pub use mqtt::{MqttConfig, MqttTransport, WillMessage};
pub use protocol::Protocol;
pub use registry::SubscriptionRegistry;
pub use requester::{DataRequester, RequestError};
pub use transport::{Handler, PubSubTransport, TransportError};
