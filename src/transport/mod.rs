//! Broker transport.
//!
//! A [`Connector`] produces one physical [`Channel`]; the
//! [`TransportSession`] turns a sequence of channels into one logical
//! connection with heartbeats and a guarded reconnect timer.

pub mod memory;
pub mod session;
pub mod ws;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::{InboundMessage, OutboundMessage};

pub use memory::{BrokerHandle, MemoryConnector};
pub use session::{latency_since, SessionConfig, TransportSession};
pub use ws::WsConnector;

/// One established physical connection.
///
/// Dropping `outbound` closes the write side; the inbound stream ends or
/// yields an error when the connection is lost.
pub struct Channel {
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub inbound: BoxStream<'static, Result<InboundMessage, TransportError>>,
}

/// Opens physical connections to the broker.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<Channel, TransportError>>;

    /// Human readable target for logs.
    fn describe(&self) -> String;
}

/// Lifecycle notifications, delivered in order on the session's event stream.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Closed { reason: String },
    Error(TransportError),
    Frame(InboundMessage),
    /// Round trip measured from a heartbeat acknowledgment.
    Heartbeat { latency_ms: u64 },
}
