use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{ExecutionMode, Runtime, TagValue};
use crate::store::{ConflictId, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Connect,
    Heartbeat,
    TagUpdate,
    Conflict,
    SyncStatus,
    LogicPushRequest,
    LogicPushResponse,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connect => "CONNECT",
            EventType::Heartbeat => "HEARTBEAT",
            EventType::TagUpdate => "TAG_UPDATE",
            EventType::Conflict => "CONFLICT",
            EventType::SyncStatus => "SYNC_STATUS",
            EventType::LogicPushRequest => "LOGIC_PUSH_REQUEST",
            EventType::LogicPushResponse => "LOGIC_PUSH_RESPONSE",
        }
    }
}

/// Type-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Connected {
        client_id: Option<String>,
    },
    Disconnected {
        reason: String,
    },
    Heartbeat {
        latency_ms: u64,
    },
    TagUpdate {
        name: String,
        value: TagValue,
        runtime: Runtime,
    },
    Conflict {
        tag_name: String,
        shadow_value: TagValue,
        live_value: TagValue,
        conflict_type: Option<String>,
        description: Option<String>,
    },
    StatusUpdate {
        shadow_ok: Option<bool>,
        live_ok: Option<bool>,
        execution_mode: Option<ExecutionMode>,
    },
    /// Audit record written by the store when an operator resolves a conflict.
    Resolved {
        conflict_id: ConflictId,
        tag_name: String,
        resolution: Resolution,
    },
    PushRequest {
        logic_id: String,
    },
    PushResponse {
        logic_id: String,
        success: bool,
        error: Option<String>,
    },
}

/// One observed or derived event. Appended to the event log for
/// observability only; protocol decisions never read the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl SyncEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self::at(payload, Utc::now())
    }

    pub fn at(payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        let event_type = match &payload {
            EventPayload::Connected { .. } => EventType::Connect,
            EventPayload::Heartbeat { .. } => EventType::Heartbeat,
            EventPayload::TagUpdate { .. } => EventType::TagUpdate,
            EventPayload::Conflict { .. } => EventType::Conflict,
            EventPayload::Disconnected { .. }
            | EventPayload::StatusUpdate { .. }
            | EventPayload::Resolved { .. } => EventType::SyncStatus,
            EventPayload::PushRequest { .. } => EventType::LogicPushRequest,
            EventPayload::PushResponse { .. } => EventType::LogicPushResponse,
        };
        Self {
            id: Uuid::new_v4(),
            event_type,
            timestamp,
            payload,
        }
    }

    /// One-line summary for logs and the console.
    pub fn summary(&self) -> String {
        match &self.payload {
            EventPayload::Connected { client_id } => match client_id {
                Some(id) => format!("connected as {id}"),
                None => "connected".to_string(),
            },
            EventPayload::Disconnected { reason } => format!("disconnected: {reason}"),
            EventPayload::Heartbeat { latency_ms } => format!("heartbeat {latency_ms}ms"),
            EventPayload::TagUpdate { name, value, runtime } => {
                format!("{name} = {value} ({})", runtime.as_str())
            }
            EventPayload::Conflict {
                tag_name,
                shadow_value,
                live_value,
                ..
            } => format!("{tag_name}: shadow {shadow_value} vs live {live_value}"),
            EventPayload::StatusUpdate {
                shadow_ok, live_ok, ..
            } => format!("status shadow={shadow_ok:?} live={live_ok:?}"),
            EventPayload::Resolved {
                tag_name,
                resolution,
                ..
            } => format!("{tag_name} resolved with {}", resolution.as_str()),
            EventPayload::PushRequest { logic_id } => format!("push {logic_id} requested"),
            EventPayload::PushResponse {
                logic_id,
                success,
                error,
            } => match (success, error) {
                (true, _) => format!("push {logic_id} committed"),
                (false, Some(err)) => format!("push {logic_id} failed: {err}"),
                (false, None) => format!("push {logic_id} failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_follows_payload() {
        let event = SyncEvent::new(EventPayload::Disconnected {
            reason: "io".into(),
        });
        assert_eq!(event.event_type, EventType::SyncStatus);

        let event = SyncEvent::new(EventPayload::PushResponse {
            logic_id: "logic-1".into(),
            success: true,
            error: None,
        });
        assert_eq!(event.event_type, EventType::LogicPushResponse);
        assert_eq!(event.summary(), "push logic-1 committed");
    }

    #[test]
    fn test_serialized_type_name() {
        let event = SyncEvent::new(EventPayload::Heartbeat { latency_ms: 12 });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "HEARTBEAT");
        assert_eq!(json["payload"]["kind"], "heartbeat");
    }
}
