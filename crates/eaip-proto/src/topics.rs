//! Topic scheme for device channels.
//!
//! Topic structure: `{base}/{device_id}/{channel}[/{sub_id}]`
//!
//! The channel owner decides whose id appears in the topic:
//! - `STATUS` and `DATA` live under the producing device
//! - `START`, `STOP` and `DO` live under the device receiving the request
//! - `DONE` lives under the device that executed the command

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base address used when none is configured.
pub const DEFAULT_BASE_URL: &str = "eaip://uni-due.de";

/// Final category segment of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Device liveness
    Status,
    /// Data stream
    Data,
    /// Start request for a data stream
    Start,
    /// Stop request for a data stream
    Stop,
    /// Command request
    Do,
    /// Command result
    Done,
}

impl Channel {
    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "STATUS",
            Self::Data => "DATA",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Do => "DO",
            Self::Done => "DONE",
        }
    }

    /// Whether topics of this channel carry a data id or command name.
    #[must_use]
    pub const fn has_sub_id(self) -> bool {
        !matches!(self, Self::Status)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STATUS" => Ok(Self::Status),
            "DATA" => Ok(Self::Data),
            "START" => Ok(Self::Start),
            "STOP" => Ok(Self::Stop),
            "DO" => Ok(Self::Do),
            "DONE" => Ok(Self::Done),
            other => Err(ParseError::Channel(other.to_string())),
        }
    }
}

/// Components of a parsed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicParts {
    /// Device the topic is addressed under
    pub device_id: String,
    /// Channel segment
    pub channel: Channel,
    /// Data id or command name (absent for `STATUS`)
    pub sub_id: Option<String>,
}

/// Topic scheme bound to a normalized base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl TopicScheme {
    /// Create a scheme for the given base address.
    ///
    /// Leading whitespace and one trailing `/` are removed.
    #[must_use]
    pub fn new(base: &str) -> Self {
        let base = base.trim_start();
        let base = base.strip_suffix('/').unwrap_or(base);
        Self {
            base: base.to_string(),
        }
    }

    /// Normalized base address.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Address of a device, used as return address in start/stop requests.
    #[must_use]
    pub fn device_address(&self, device_id: &str) -> String {
        format!("{}/{}", self.base, device_id)
    }

    /// Build the topic for a device channel.
    ///
    /// `sub_id` has one leading and one trailing `/` stripped.
    #[must_use]
    pub fn topic(&self, device_id: &str, channel: Channel, sub_id: Option<&str>) -> String {
        match sub_id {
            Some(sub_id) => format!(
                "{}/{}/{}/{}",
                self.base,
                device_id,
                channel,
                trim_slashes(sub_id)
            ),
            None => format!("{}/{}/{}", self.base, device_id, channel),
        }
    }

    /// Topic for status messages of a device.
    #[must_use]
    pub fn status(&self, device_id: &str) -> String {
        self.topic(device_id, Channel::Status, None)
    }

    /// Parse a topic to extract components.
    ///
    /// Returns `None` for topics outside this base address or with an
    /// unexpected shape.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<TopicParts> {
        let remainder = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let mut parts = remainder.splitn(3, '/');

        let device_id = parts.next().filter(|id| !id.is_empty())?;
        let channel: Channel = parts.next()?.parse().ok()?;
        let sub_id = parts.next();

        match (channel.has_sub_id(), sub_id) {
            (false, None) => {}
            (true, Some(sub_id)) if !sub_id.is_empty() => {}
            _ => return None,
        }

        Some(TopicParts {
            device_id: device_id.to_string(),
            channel,
            sub_id: sub_id.map(str::to_string),
        })
    }
}

/// Strip one leading and one trailing `/`.
#[must_use]
pub fn trim_slashes(value: &str) -> &str {
    let value = value.strip_prefix('/').unwrap_or(value);
    value.strip_suffix('/').unwrap_or(value)
}
