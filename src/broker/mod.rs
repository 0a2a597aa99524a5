//! Development broker: a WebSocket relay plus the deployment routes, for
//! local runs and integration tests.

pub mod api;

use anyhow::Result;
use colored::*;
use tokio::net::TcpListener;

pub use api::{router, serve, BrokerState};

pub async fn bind(port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind(("0.0.0.0", port)).await?)
}

/// Run the broker on `port` until the process exits.
pub async fn start(port: u16) -> Result<()> {
    let listener = bind(port).await?;
    let addr = listener.local_addr()?;
    println!(
        "{} Broker running at {} (websocket at {})",
        "✓".green(),
        format!("http://{}", addr).bright_blue(),
        format!("ws://{}/ws", addr).bright_blue()
    );
    serve(listener, BrokerState::default()).await
}
