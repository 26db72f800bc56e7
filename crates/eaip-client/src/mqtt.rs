//! MQTT transport backed by `rumqttc`.
//!
//! Requests are queued on the `rumqttc` client and return once queued. A
//! delivery thread drives the connection and dispatches incoming publishes
//! through the local [`SubscriptionRegistry`].

use crate::filter::TopicFilter;
use crate::registry::SubscriptionRegistry;
use crate::transport::{Handler, PubSubTransport, TransportError};
use parking_lot::Mutex;
use rumqttc::{Client, Connection, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use url::Url;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_PORT: u16 = 1883;

/// Message the broker publishes on behalf of a client that drops.
#[derive(Debug, Clone)]
pub struct WillMessage {
    /// Concrete topic
    pub topic: String,
    /// Payload
    pub payload: String,
}

/// Configuration for the MQTT transport.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub broker: String,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Retained will message
    pub last_will: Option<WillMessage>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            client_id: "eaip-client".to_string(),
            keep_alive: Duration::from_secs(30),
            last_will: None,
        }
    }
}

/// Pub/sub transport over an MQTT broker.
pub struct MqttTransport {
    client: Client,
    client_id: String,
    registry: Arc<SubscriptionRegistry>,
    stopping: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create the client and start the delivery thread.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid or the delivery thread
    /// cannot be spawned.
    pub fn connect(config: MqttConfig) -> Result<Self, TransportError> {
        let (host, port) = parse_mqtt_url(&config.broker)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        if let Some(will) = &config.last_will {
            mqtt_options.set_last_will(LastWill::new(
                &will.topic,
                will.payload.as_bytes().to_vec(),
                QoS::AtLeastOnce,
                true,
            ));
        }

        let (client, connection) = Client::new(mqtt_options, 100);
        let registry = Arc::new(SubscriptionRegistry::new());
        let stopping = Arc::new(AtomicBool::new(false));

        let worker = {
            let client = client.clone();
            let registry = Arc::clone(&registry);
            let stopping = Arc::clone(&stopping);
            thread::Builder::new()
                .name(format!("eaip-mqtt-{}", config.client_id))
                .spawn(move || run_connection(connection, &client, &registry, &stopping))
                .map_err(|e| TransportError::Connection(format!("delivery thread: {e}")))?
        };

        tracing::info!(
            broker = %config.broker,
            client_id = %config.client_id,
            "MQTT transport started"
        );

        Ok(Self {
            client,
            client_id: config.client_id,
            registry,
            stopping,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Local subscriptions of this client.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Disconnect from the broker and wait for the delivery thread.
    ///
    /// The will message is not published on a clean disconnect.
    pub fn disconnect(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            tracing::warn!(error = %e, "MQTT disconnect request failed");
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::warn!("MQTT delivery thread panicked");
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            let _ = self.client.disconnect();
        }
    }
}

impl PubSubTransport for MqttTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        tracing::debug!(topic, payload_len = payload.len(), retain, "Publishing");

        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn subscribe(&self, filter: &str, handler: Handler) -> Result<(), TransportError> {
        tracing::info!(filter, "Subscribing");

        // Register first so retained messages arriving with the SUBACK are routed.
        let compiled = TopicFilter::new(filter)?;
        let previous = self.registry.replace(compiled.clone(), handler);

        if let Err(e) = self.client.subscribe(filter, QoS::AtLeastOnce) {
            match previous {
                Some(previous) => {
                    self.registry.replace(compiled, previous);
                }
                None => {
                    if let Err(cleanup) = self.registry.unsubscribe(filter) {
                        tracing::warn!(
                            error = %cleanup,
                            filter,
                            "Failed to roll back subscription"
                        );
                    }
                }
            }
            return Err(TransportError::Subscribe(e.to_string()));
        }

        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        if !self.registry.contains(filter) {
            return Err(TransportError::NotSubscribed(filter.to_string()));
        }

        tracing::info!(filter, "Unsubscribing");

        self.client
            .unsubscribe(filter)
            .map_err(|e| TransportError::Unsubscribe(e.to_string()))?;
        self.registry.unsubscribe(filter)
    }
}

fn run_connection(
    mut connection: Connection,
    client: &Client,
    registry: &SubscriptionRegistry,
    stopping: &AtomicBool,
) {
    let mut connected_before = false;

    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                tracing::debug!(
                    topic = %publish.topic,
                    payload_len = publish.payload.len(),
                    "Received MQTT message"
                );
                registry.dispatch(&publish.topic, &payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!("Connected to MQTT broker");
                if connected_before && !ack.session_present {
                    resubscribe(client, registry);
                }
                connected_before = true;
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                tracing::debug!("Subscription acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("Disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                tracing::error!(error = %e, "MQTT error");
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}

fn resubscribe(client: &Client, registry: &SubscriptionRegistry) {
    for filter in registry.filters() {
        tracing::info!(filter = %filter, "Restoring subscription");
        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
            tracing::warn!(error = %e, filter = %filter, "Failed to restore subscription");
        }
    }
}

/// Split a broker address into host and port.
///
/// Accepts `tcp://host[:port]`, `mqtt://host[:port]` or a bare `host[:port]`.
fn parse_mqtt_url(address: &str) -> Result<(String, u16), TransportError> {
    let invalid =
        |reason: String| TransportError::InvalidBrokerUrl(format!("{address}: {reason}"));

    let url = if address.contains("://") {
        Url::parse(address)
    } else {
        Url::parse(&format!("tcp://{address}"))
    }
    .map_err(|e| invalid(e.to_string()))?;

    if !matches!(url.scheme(), "tcp" | "mqtt") {
        return Err(invalid(format!(
            "scheme '{}' is not an MQTT transport",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("broker host is missing".to_string()))?;

    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_PORT)))
}
