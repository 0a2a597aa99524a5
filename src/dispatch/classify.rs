use crate::event::{EventPayload, SyncEvent};
use crate::protocol::InboundMessage;
use crate::transport::TransportEvent;

/// Turn a transport notification into a domain event.
pub fn classify(event: TransportEvent) -> SyncEvent {
    let payload = match event {
        TransportEvent::Opened => EventPayload::Connected { client_id: None },
        TransportEvent::Closed { reason } => EventPayload::Disconnected { reason },
        TransportEvent::Error(err) => EventPayload::Disconnected {
            reason: err.to_string(),
        },
        TransportEvent::Heartbeat { latency_ms } => EventPayload::Heartbeat { latency_ms },
        TransportEvent::Frame(frame) => return classify_frame(frame),
    };
    SyncEvent::new(payload)
}

pub fn classify_frame(frame: InboundMessage) -> SyncEvent {
    match frame {
        InboundMessage::Connect { client_id } => SyncEvent::new(EventPayload::Connected { client_id }),
        // normally folded into TransportEvent::Heartbeat by the session
        InboundMessage::HeartbeatAck { timestamp } => {
            let now = chrono::Utc::now().timestamp_millis();
            SyncEvent::new(EventPayload::Heartbeat {
                latency_ms: crate::transport::latency_since(timestamp, now),
            })
        }
        InboundMessage::TagUpdate {
            name,
            value,
            runtime,
            timestamp,
        } => SyncEvent::at(EventPayload::TagUpdate { name, value, runtime }, timestamp),
        InboundMessage::Conflict {
            tag_name,
            shadow_value,
            live_value,
            timestamp,
            conflict_type,
            description,
        } => SyncEvent::at(
            EventPayload::Conflict {
                tag_name,
                shadow_value,
                live_value,
                conflict_type,
                description,
            },
            timestamp,
        ),
        InboundMessage::SyncStatusUpdate {
            shadow_ok,
            live_ok,
            execution_mode,
        } => SyncEvent::new(EventPayload::StatusUpdate {
            shadow_ok,
            live_ok,
            execution_mode,
        }),
        InboundMessage::LogicPushRequest { logic_id } => {
            SyncEvent::new(EventPayload::PushRequest { logic_id })
        }
        InboundMessage::LogicPushResponse {
            logic_id,
            success,
            error,
        } => SyncEvent::new(EventPayload::PushResponse {
            logic_id,
            success,
            error,
        }),
    }
}
