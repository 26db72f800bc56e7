//! Agent configuration.

use anyhow::{bail, Context, Result};
use eaip_proto::topics::DEFAULT_BASE_URL;
use eaip_proto::DeviceType;
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Device id, generated if absent
    pub client_id: Option<String>,

    /// Base address of the topic namespace
    pub base_url: String,

    /// Type announced in status messages
    pub device_type: DeviceType,

    /// MQTT broker URL
    pub mqtt_broker: String,

    /// Keep-alive interval
    pub keep_alive: Duration,

    /// Additional status fields
    pub status_fields: Vec<(String, String)>,

    /// Data streams served by this device
    pub data_streams: Vec<DataStreamConfig>,

    /// Remote stream to pull
    pub request: Option<RequestConfig>,
}

/// Data stream served on start requests.
#[derive(Debug, Clone, Deserialize)]
pub struct DataStreamConfig {
    /// Data id
    pub data_id: String,

    /// Publish interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// Remote stream pulled through a request session.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Producing device
    pub device_id: String,

    /// Data id
    pub data_id: String,

    /// Buffer drain interval
    pub poll_interval: Duration,
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            device_type: DeviceType::Node,
            mqtt_broker: "tcp://localhost:1883".to_string(),
            keep_alive: Duration::from_secs(30),
            status_fields: Vec::new(),
            data_streams: Vec::new(),
            request: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EAIP_CLIENT_ID`: Device id
    /// - `EAIP_BASE_URL`: Topic base address
    /// - `EAIP_DEVICE_TYPE`: "APP" or "NODE"
    /// - `EAIP_MQTT_BROKER`: MQTT broker URL
    /// - `EAIP_STATUS_FIELDS`: JSON list of `[key, value]` pairs
    /// - `EAIP_DATA_STREAMS`: JSON list of `{"data_id", "interval_ms"}`
    /// - `EAIP_REQUEST`: `device_id/data_id` to pull
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("EAIP_CLIENT_ID") {
            config.client_id = Some(id);
        }

        if let Ok(base_url) = std::env::var("EAIP_BASE_URL") {
            config.base_url = base_url;
        }

        if let Ok(device_type) = std::env::var("EAIP_DEVICE_TYPE") {
            config.device_type = device_type.parse().context("Invalid EAIP_DEVICE_TYPE")?;
        }

        if let Ok(mqtt) = std::env::var("EAIP_MQTT_BROKER") {
            config.mqtt_broker = mqtt;
        }

        if let Ok(fields_json) = std::env::var("EAIP_STATUS_FIELDS") {
            config.status_fields =
                serde_json::from_str(&fields_json).context("Invalid EAIP_STATUS_FIELDS JSON")?;
        }

        if let Ok(streams_json) = std::env::var("EAIP_DATA_STREAMS") {
            config.data_streams =
                serde_json::from_str(&streams_json).context("Invalid EAIP_DATA_STREAMS JSON")?;
        }

        if let Ok(request) = std::env::var("EAIP_REQUEST") {
            config.request = Some(parse_request(&request).context("Invalid EAIP_REQUEST")?);
        }

        Ok(config)
    }
}

/// Parse `device_id/data_id`; the data id may contain further `/`.
fn parse_request(value: &str) -> Result<RequestConfig> {
    let Some((device_id, data_id)) = value.split_once('/') else {
        bail!("expected device_id/data_id, got '{value}'");
    };
    if device_id.is_empty() || data_id.is_empty() {
        bail!("expected device_id/data_id, got '{value}'");
    }

    Ok(RequestConfig {
        device_id: device_id.to_string(),
        data_id: data_id.to_string(),
        poll_interval: Duration::from_secs(1),
    })
}
