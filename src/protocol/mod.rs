//! Broker wire protocol.
//!
//! Frames are JSON text: `{"type": "<snake_case kind>", ...camelCase fields}`.

pub mod message;
pub mod value;

pub use message::{ExecutionMode, InboundMessage, OutboundMessage, Runtime};
pub use value::TagValue;

use crate::error::TransportError;

pub fn decode(text: &str) -> Result<InboundMessage, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))
}

pub fn encode(message: &OutboundMessage) -> Result<String, TransportError> {
    serde_json::to_string(message).map_err(|e| TransportError::Decode(e.to_string()))
}
