use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{InboundMessage, OutboundMessage, Runtime};
use crate::push::PushOutcome;
use crate::store::TagSample;

/// Shared broker state. Cheap to clone; every handler gets its own copy.
#[derive(Clone)]
pub struct BrokerState {
    /// Frames fanned out to every connected client.
    pub hub: broadcast::Sender<InboundMessage>,
    /// client id -> client type
    pub clients: Arc<DashMap<Uuid, String>>,
    pub tags: Arc<DashMap<(String, Runtime), TagSample>>,
    pub logic: Arc<DashMap<(String, Runtime), String>>,
}

impl Default for BrokerState {
    fn default() -> Self {
        let (hub, _) = broadcast::channel(256);
        Self {
            hub,
            clients: Arc::new(DashMap::new()),
            tags: Arc::new(DashMap::new()),
            logic: Arc::new(DashMap::new()),
        }
    }
}

impl BrokerState {
    /// Fan a frame out to every client, recording tag values on the way.
    pub fn publish(&self, frame: InboundMessage) {
        if let InboundMessage::TagUpdate {
            name,
            value,
            runtime,
            timestamp,
        } = &frame
        {
            self.tags.insert(
                (name.clone(), *runtime),
                TagSample {
                    name: name.clone(),
                    value: value.clone(),
                    runtime: *runtime,
                    timestamp: *timestamp,
                },
            );
        }
        // no receivers is fine: nobody is connected yet
        let _ = self.hub.send(frame);
    }
}

pub fn router(state: BrokerState) -> Router {
    Router::new()
        .route("/", get(|| async { "shadow-sync development broker" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/ws", get(ws_handler))
        .route("/publish", post(publish_frame))
        .route("/tags/snapshot", get(tag_snapshot))
        .route("/logic/{id}", get(get_logic).put(put_logic))
        .route("/logic/{id}/push", post(push_logic))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: BrokerState) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "development broker listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_handler(
    State(state): State<BrokerState>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

async fn handle_ws(state: BrokerState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = Uuid::new_v4();

    // Replies meant for this client only (acks) share the writer with the hub
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<InboundMessage>();
    let mut hub_rx = state.hub.subscribe();
    let send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = direct_rx.recv() => frame,
                received = hub_rx.recv() => match received {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%client_id, skipped, "client lagging; frames skipped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<OutboundMessage>(text.as_str()) {
                Ok(frame) => handle_client_frame(&state, client_id, &direct_tx, frame),
                Err(err) => debug!(%client_id, error = %err, "ignoring undecodable client frame"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    send_task.abort();
    if state.clients.remove(&client_id).is_some() {
        info!(%client_id, "client disconnected");
    }
}

fn handle_client_frame(
    state: &BrokerState,
    client_id: Uuid,
    direct: &mpsc::UnboundedSender<InboundMessage>,
    frame: OutboundMessage,
) {
    match frame {
        OutboundMessage::ConnectClient { client_type, .. } => {
            info!(%client_id, %client_type, "client registered");
            state.clients.insert(client_id, client_type);
            let _ = direct.send(InboundMessage::Connect {
                client_id: Some(client_id.to_string()),
            });
        }
        OutboundMessage::ProjectConnect { project_id } => {
            info!(%client_id, %project_id, "client joined project");
        }
        OutboundMessage::Heartbeat { timestamp } => {
            let _ = direct.send(InboundMessage::HeartbeatAck { timestamp });
        }
        OutboundMessage::TagUpdate {
            name,
            value,
            runtime,
            timestamp,
        } => state.publish(InboundMessage::TagUpdate {
            name,
            value,
            runtime,
            timestamp,
        }),
        OutboundMessage::LogicPushRequest { logic_id } => {
            state.publish(InboundMessage::LogicPushRequest { logic_id });
        }
    }
}

/// Inject any broker frame, standing in for the runtimes behind the broker.
async fn publish_frame(State(state): State<BrokerState>, Json(frame): Json<InboundMessage>) -> StatusCode {
    debug!(kind = frame.kind(), "frame published over http");
    state.publish(frame);
    StatusCode::ACCEPTED
}

async fn tag_snapshot(State(state): State<BrokerState>) -> Json<Vec<TagSample>> {
    let mut samples: Vec<TagSample> = state.tags.iter().map(|entry| entry.value().clone()).collect();
    samples.sort_by(|a, b| (&a.name, a.runtime.as_str()).cmp(&(&b.name, b.runtime.as_str())));
    Json(samples)
}

#[derive(Deserialize)]
struct RuntimeQuery {
    #[serde(default)]
    runtime: Runtime,
}

async fn get_logic(
    State(state): State<BrokerState>,
    Path(id): Path<String>,
    Query(query): Query<RuntimeQuery>,
) -> String {
    state
        .logic
        .get(&(id, query.runtime))
        .map(|source| source.value().clone())
        .unwrap_or_default()
}

async fn put_logic(
    State(state): State<BrokerState>,
    Path(id): Path<String>,
    Query(query): Query<RuntimeQuery>,
    body: String,
) -> StatusCode {
    state.logic.insert((id, query.runtime), body);
    StatusCode::NO_CONTENT
}

/// Copy shadow logic to live and announce the result to every client.
async fn push_logic(State(state): State<BrokerState>, Path(id): Path<String>) -> Json<PushOutcome> {
    let shadow = state
        .logic
        .get(&(id.clone(), Runtime::Shadow))
        .map(|source| source.value().clone())
        .unwrap_or_default();
    state.logic.insert((id.clone(), Runtime::Live), shadow);
    info!(logic_id = %id, at = %Utc::now(), "logic pushed to live");
    state.publish(InboundMessage::LogicPushResponse {
        logic_id: id,
        success: true,
        error: None,
    });
    Json(PushOutcome::accepted())
}
