//! # elastic-AI Protocol
//!
//! Topic scheme and status message encoding shared by every participant.
//!
//! ## Topics
//!
//! Topic scheme: `{base}/{device_id}/{channel}[/{sub_id}]`
//!
//! - `STATUS`: retained liveness announcement of a device
//! - `DATA`: named data stream published by its producer
//! - `START` / `STOP`: requests to a producer, carrying the requester address
//! - `DO` / `DONE`: remote command and its result
//!
//! ## Status Messages
//!
//! Status payload: `ID:{id};TYPE:{type};STATE:{state};[{key}:{value};]*`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod status;
pub mod topics;

pub use status::{parse_status, status_state, DeviceState, DeviceType, StatusMessage};
pub use topics::{Channel, TopicParts, TopicScheme};

/// Error for unknown wire names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Channel name is not part of the protocol
    #[error("unknown channel: {0}")]
    Channel(String),
    /// Device type name is not part of the protocol
    #[error("unknown device type: {0}")]
    DeviceType(String),
    /// Device state name is not part of the protocol
    #[error("unknown device state: {0}")]
    DeviceState(String),
}
