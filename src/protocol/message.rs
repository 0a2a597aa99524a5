use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::TagValue;

/// Which runtime a tag value was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    #[default]
    Shadow,
    Live,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Shadow => "shadow",
            Runtime::Live => "live",
        }
    }
}

impl std::str::FromStr for Runtime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shadow" => Ok(Runtime::Shadow),
            "live" => Ok(Runtime::Live),
            other => Err(anyhow::anyhow!("unknown runtime '{other}' (expected shadow or live)")),
        }
    }
}

/// How the shadow runtime is currently being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Simulation,
    ExternalRuntime,
    Failed,
    #[default]
    Unset,
}

/// Frames received from the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    Connect {
        #[serde(default)]
        client_id: Option<String>,
    },
    HeartbeatAck {
        /// Echo of the heartbeat's send time, epoch milliseconds.
        timestamp: i64,
    },
    TagUpdate {
        name: String,
        value: TagValue,
        #[serde(default)]
        runtime: Runtime,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    Conflict {
        tag_name: String,
        shadow_value: TagValue,
        live_value: TagValue,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
        #[serde(default)]
        conflict_type: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    SyncStatusUpdate {
        #[serde(default)]
        shadow_ok: Option<bool>,
        #[serde(default)]
        live_ok: Option<bool>,
        #[serde(default)]
        execution_mode: Option<ExecutionMode>,
    },
    LogicPushRequest {
        logic_id: String,
    },
    LogicPushResponse {
        logic_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Connect { .. } => "connect",
            InboundMessage::HeartbeatAck { .. } => "heartbeat_ack",
            InboundMessage::TagUpdate { .. } => "tag_update",
            InboundMessage::Conflict { .. } => "conflict",
            InboundMessage::SyncStatusUpdate { .. } => "sync_status_update",
            InboundMessage::LogicPushRequest { .. } => "logic_push_request",
            InboundMessage::LogicPushResponse { .. } => "logic_push_response",
        }
    }
}

/// Frames sent to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    ConnectClient {
        client_type: String,
        timestamp: DateTime<Utc>,
    },
    ProjectConnect {
        project_id: String,
    },
    Heartbeat {
        timestamp: i64,
    },
    TagUpdate {
        name: String,
        value: TagValue,
        runtime: Runtime,
        timestamp: DateTime<Utc>,
    },
    LogicPushRequest {
        logic_id: String,
    },
}

impl OutboundMessage {
    pub fn connect_client(client_type: impl Into<String>) -> Self {
        OutboundMessage::ConnectClient {
            client_type: client_type.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat_now() -> Self {
        OutboundMessage::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::ConnectClient { .. } => "connect_client",
            OutboundMessage::ProjectConnect { .. } => "project_connect",
            OutboundMessage::Heartbeat { .. } => "heartbeat",
            OutboundMessage::TagUpdate { .. } => "tag_update",
            OutboundMessage::LogicPushRequest { .. } => "logic_push_request",
        }
    }
}
