//! Status message encoding.
//!
//! A status payload is a sequence of `key:value;` fields. The first three
//! fields are always `ID`, `TYPE` and `STATE`, followed by caller-supplied
//! fields in insertion order.
//!
//! Keys and values are written verbatim. A `:` or `;` inside a key or value
//! corrupts the message for every reader.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Field carrying the device id.
pub const FIELD_ID: &str = "ID";
/// Field carrying the device type.
pub const FIELD_TYPE: &str = "TYPE";
/// Field carrying the device state.
pub const FIELD_STATE: &str = "STATE";

/// Kind of participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Host application
    #[serde(rename = "APP")]
    Application,
    /// Embedded node
    #[serde(rename = "NODE")]
    Node,
}

impl DeviceType {
    /// Wire name of the device type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Application => "APP",
            Self::Node => "NODE",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APP" => Ok(Self::Application),
            "NODE" => Ok(Self::Node),
            other => Err(ParseError::DeviceType(other.to_string())),
        }
    }
}

/// Last known liveness of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceState {
    /// Device is gone
    Offline,
    /// Device is reachable
    Online,
}

impl DeviceState {
    /// Wire name of the device state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Online => "ONLINE",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFFLINE" => Ok(Self::Offline),
            "ONLINE" => Ok(Self::Online),
            other => Err(ParseError::DeviceState(other.to_string())),
        }
    }
}

/// Status announcement of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    /// Device id
    pub device_id: String,
    /// Device type
    pub device_type: DeviceType,
    /// Device state
    pub state: DeviceState,
    /// Additional fields, written in order after the mandatory ones
    pub fields: Vec<(String, String)>,
}

impl StatusMessage {
    /// Create a status message without additional fields.
    #[must_use]
    pub fn new(device_id: impl Into<String>, device_type: DeviceType, state: DeviceState) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
            state,
            fields: Vec::new(),
        }
    }

    /// Append an additional field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// Encode to the wire format.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut message = format!(
            "{FIELD_ID}:{};{FIELD_TYPE}:{};{FIELD_STATE}:{};",
            self.device_id, self.device_type, self.state
        );
        for (key, value) in &self.fields {
            message.push_str(key);
            message.push(':');
            message.push_str(value);
            message.push(';');
        }
        message
    }
}

/// Parse a status payload into its fields.
///
/// Fragments are split on the first `:`. A fragment without `:` becomes a
/// key with an empty value; blank fragments are dropped. Later duplicates
/// overwrite earlier ones.
#[must_use]
pub fn parse_status(message: &str) -> HashMap<String, String> {
    message
        .split(';')
        .filter(|fragment| !fragment.trim().is_empty())
        .map(|fragment| {
            let (key, value) = fragment.split_once(':').unwrap_or((fragment, ""));
            (key.to_string(), value.to_string())
        })
        .collect()
}

/// Extract the `STATE` field of a status payload.
///
/// Returns `None` if the field is missing or holds an unknown state.
#[must_use]
pub fn status_state(message: &str) -> Option<DeviceState> {
    parse_status(message).get(FIELD_STATE)?.parse().ok()
}
