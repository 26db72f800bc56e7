//! Agent runtime orchestration.

use crate::config::{AgentConfig, DataStreamConfig, RequestConfig};
use anyhow::{Context, Result};
use eaip_client::{
    DataRequester, MqttConfig, MqttTransport, Protocol, PubSubTransport, RequestError, WillMessage,
};
use eaip_proto::{DeviceState, StatusMessage, TopicScheme};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Command answered with its own settings.
const ECHO_COMMAND: &str = "ECHO";

type Endpoint = Protocol<MqttTransport>;

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
    client_id: String,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig, client_id: String) -> Self {
        Self { config, client_id }
    }

    /// Run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if connecting, announcing or subscribing fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let scheme = TopicScheme::new(&self.config.base_url);
        let will = StatusMessage {
            device_id: self.client_id.clone(),
            device_type: self.config.device_type,
            state: DeviceState::Offline,
            fields: self.config.status_fields.clone(),
        };

        let transport = MqttTransport::connect(MqttConfig {
            broker: self.config.mqtt_broker.clone(),
            client_id: self.client_id.clone(),
            keep_alive: self.config.keep_alive,
            last_will: Some(WillMessage {
                topic: scheme.status(&self.client_id),
                payload: will.encode(),
            }),
        })
        .context("Failed to create MQTT transport")?;

        let protocol = Arc::new(Protocol::new(
            transport,
            self.config.device_type,
            &self.config.base_url,
        ));

        protocol
            .publish_status(DeviceState::Online, &self.config.status_fields)
            .context("Failed to announce status")?;

        serve_echo(&protocol).context("Failed to subscribe to commands")?;

        for stream in &self.config.data_streams {
            serve_stream(&protocol, stream)
                .with_context(|| format!("Failed to serve data stream '{}'", stream.data_id))?;
        }

        match &self.config.request {
            Some(request) => pull_stream(&protocol, request).await?,
            None => {
                tracing::info!("Agent running, press Ctrl+C to stop");
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for shutdown signal")?;
                tracing::info!("Shutdown signal received");
            }
        }

        if let Err(e) = protocol.publish_status(DeviceState::Offline, &self.config.status_fields) {
            tracing::warn!(error = %e, "Failed to announce shutdown");
        }
        protocol.transport().disconnect();

        Ok(())
    }
}

/// Answer `ECHO` commands with their settings.
fn serve_echo(protocol: &Arc<Endpoint>) -> Result<()> {
    let executor = Arc::downgrade(protocol);
    protocol.subscribe_do(ECHO_COMMAND, move |topic: &str, settings: &str| {
        let Some(executor) = executor.upgrade() else {
            return;
        };
        tracing::info!(topic, "Executing command");
        if let Err(e) = executor.publish_done(executor.device_id(), ECHO_COMMAND, settings) {
            tracing::warn!(error = %e, "Failed to publish command result");
        }
    })?;
    Ok(())
}

/// Publish a counter on `stream` while a requester asked for it.
fn serve_stream(protocol: &Arc<Endpoint>, stream: &DataStreamConfig) -> Result<()> {
    let active = Arc::new(AtomicBool::new(false));

    let on_start = Arc::clone(&active);
    protocol.subscribe_start(&stream.data_id, move |topic: &str, requester: &str| {
        tracing::info!(topic, requester, "Start requested");
        on_start.store(true, Ordering::SeqCst);
    })?;

    let on_stop = Arc::clone(&active);
    protocol.subscribe_stop(&stream.data_id, move |topic: &str, requester: &str| {
        tracing::info!(topic, requester, "Stop requested");
        on_stop.store(false, Ordering::SeqCst);
    })?;

    tokio::spawn(produce(
        Arc::downgrade(protocol),
        stream.data_id.clone(),
        Duration::from_millis(stream.interval_ms),
        active,
    ));

    tracing::info!(data_id = %stream.data_id, "Serving data stream");
    Ok(())
}

async fn produce(
    protocol: Weak<Endpoint>,
    data_id: String,
    period: Duration,
    active: Arc<AtomicBool>,
) {
    let mut counter: u64 = 0;
    let mut ticker = tokio::time::interval(period);

    loop {
        ticker.tick().await;
        let Some(protocol) = protocol.upgrade() else {
            break;
        };
        if !active.load(Ordering::SeqCst) {
            continue;
        }

        counter += 1;
        if let Err(e) = protocol.publish_data(&data_id, &counter.to_string()) {
            tracing::warn!(error = %e, data_id = %data_id, "Failed to publish data");
        }
    }
}

/// Pull a remote stream until Ctrl+C, logging every value.
async fn pull_stream(protocol: &Endpoint, request: &RequestConfig) -> Result<()> {
    let requester = DataRequester::new(protocol, &request.device_id, &request.data_id)
        .context("Failed to open data request session")?;

    let mut started = false;
    let mut ticker = tokio::time::interval(request.poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !started {
                    started = try_start(&requester);
                }
                while let Some(value) = requester.get_data() {
                    tracing::info!(
                        device_id = %request.device_id,
                        data_id = %request.data_id,
                        value = %value,
                        "Received data"
                    );
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    if started {
        if let Err(e) = requester.stop() {
            tracing::warn!(error = %e, "Failed to request stop");
        }
    }
    requester.close().context("Failed to close data request session")?;

    Ok(())
}

fn try_start<T: PubSubTransport>(requester: &DataRequester<'_, T>) -> bool {
    match requester.start() {
        Ok(()) => {
            tracing::info!(device_id = requester.device_id(), "Data requested");
            true
        }
        Err(RequestError::DeviceUnavailable { device_id }) => {
            tracing::debug!(%device_id, "Target offline, retrying");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to request data");
            false
        }
    }
}
