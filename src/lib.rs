//! # shadow-sync
//!
//! Client-side reconciliation between a shadow (simulation) runtime and a
//! live (production) runtime of a control-logic deployment pipeline.
//!
//! The pieces, leaves first:
//!
//! - [`transport`]: one logical broker connection with heartbeats and a
//!   guarded reconnect timer
//! - [`dispatch`]: classification of transport events and fault-isolated
//!   fan-out to subscribers
//! - [`store`]: connection health, the conflict set, the event log and tag
//!   buffers, plus the resolution protocol
//! - [`push`]: the gated path that commits shadow logic to live
//!
//! [`SyncClient`] wires them together.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shadow_sync::{ClientConfig, SyncClient, WsConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connector = WsConnector::new("ws://127.0.0.1:8787/ws")?;
//!     let client = SyncClient::new(Arc::new(connector), ClientConfig::default());
//!     client.connect().await;
//!     for conflict in client.conflicts() {
//!         println!("{} shadow={} live={}", conflict.tag_name, conflict.shadow_value, conflict.live_value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod console;
pub mod demo;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod poll;
pub mod protocol;
pub mod push;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use client::{ClientConfig, SyncClient};
pub use config::SyncConfig;
pub use dispatch::{EventDispatcher, Subscription};
pub use error::{ConfigError, ErrorKind, PushError, ProtocolViolation, TransportError};
pub use event::{EventPayload, EventType, SyncEvent};
pub use protocol::{ExecutionMode, InboundMessage, OutboundMessage, Runtime, TagValue};
pub use push::{
    ChangePreview, ConfirmedPush, DeploymentEndpoint, HttpDeployment, LocalDeployment, Preview, PushOrchestrator,
    PushOutcome, PushReceipt,
};
pub use store::{Conflict, ConflictId, ConnectionStatus, Resolution, SharedStore, SyncStore};
pub use transport::{MemoryConnector, TransportSession, WsConnector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
