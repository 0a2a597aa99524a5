use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shadow_sync::transport::BrokerHandle;
use shadow_sync::{
    ClientConfig, InboundMessage, LocalDeployment, MemoryConnector, ProtocolViolation, PushError, Resolution,
    Runtime, SyncClient, TagValue,
};

const WAIT: Duration = Duration::from_secs(1);

async fn ready_client() -> (SyncClient, BrokerHandle) {
    let (connector, broker) = MemoryConnector::new();
    let client = SyncClient::new(Arc::new(connector), ClientConfig::default());
    client.connect().await;
    broker.push(InboundMessage::SyncStatusUpdate {
        shadow_ok: Some(true),
        live_ok: Some(true),
        execution_mode: None,
    });
    assert!(client.wait_until(WAIT, |s| s.status().shadow_ok).await);
    (client, broker)
}

fn tag(broker: &BrokerHandle, name: &str, runtime: Runtime, value: impl Into<TagValue>) {
    broker.push(InboundMessage::TagUpdate {
        name: name.to_string(),
        value: value.into(),
        runtime,
        timestamp: Utc::now(),
    });
}

#[tokio::test(start_paused = true)]
async fn tank_level_conflict_gates_push_until_resolved() {
    let (client, broker) = ready_client().await;
    let endpoint = Arc::new(LocalDeployment::new());
    let orchestrator = client.orchestrator(endpoint.clone());

    tag(&broker, "Tank_Level", Runtime::Shadow, 50.0);
    tag(&broker, "Tank_Level", Runtime::Live, 48.0);
    assert!(client.wait_until(WAIT, |s| s.conflicts().len() == 1).await);

    let conflict = client.conflicts().remove(0);
    assert_eq!(conflict.tag_name, "Tank_Level");
    assert!(!conflict.resolved);

    let resolved = client.resolve_conflict(conflict.id, Resolution::Shadow).unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolution, Some(Resolution::Shadow));
    assert!(client.store().lock().unresolved_conflicts().is_empty());

    orchestrator.push_to_live("logic-1").await.unwrap();
    assert_eq!(endpoint.pushes(), vec!["logic-1".to_string()]);
    assert!(client.conflicts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resolve_all_keeps_recorded_values() {
    let (client, broker) = ready_client().await;
    tag(&broker, "TagA", Runtime::Shadow, 1.0);
    tag(&broker, "TagA", Runtime::Live, 2.0);
    tag(&broker, "TagB", Runtime::Shadow, "RUN");
    tag(&broker, "TagB", Runtime::Live, "STOP");
    assert!(client.wait_until(WAIT, |s| s.conflicts().unresolved_count() == 2).await);
    let before = client.conflicts();

    let ids = client.resolve_all_conflicts(Resolution::Live);
    assert_eq!(ids.len(), 2);

    let after = client.conflicts();
    assert_eq!(after.len(), 2);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(new.resolution, Some(Resolution::Live));
        assert!(new.resolved);
        assert_eq!(old.shadow_value, new.shadow_value);
        assert_eq!(old.live_value, new.live_value);
    }
}

#[tokio::test(start_paused = true)]
async fn push_with_open_conflict_never_reaches_endpoint() {
    let (client, broker) = ready_client().await;
    let endpoint = Arc::new(LocalDeployment::new());
    let orchestrator = client.orchestrator(endpoint.clone());

    tag(&broker, "Pump_Status", Runtime::Shadow, true);
    tag(&broker, "Pump_Status", Runtime::Live, false);
    assert!(client.wait_until(WAIT, |s| s.conflicts().len() == 1).await);
    let before = client.conflicts();

    let err = orchestrator.push_to_live("logic-1").await.unwrap_err();
    assert!(matches!(
        err,
        PushError::Policy(ProtocolViolation::UnresolvedConflicts { count: 1 })
    ));
    assert!(endpoint.pushes().is_empty());
    assert_eq!(client.conflicts(), before);
}

#[tokio::test(start_paused = true)]
async fn repeated_divergence_never_duplicates_open_conflict() {
    let (client, broker) = ready_client().await;
    tag(&broker, "Flow", Runtime::Shadow, 10.0);
    for live in [9.0, 8.5, 8.0, 7.5] {
        tag(&broker, "Flow", Runtime::Live, live);
    }
    assert!(
        client
            .wait_until(WAIT, |s| s.tag("Flow").and_then(|p| p.live.clone()) == Some(TagValue::Number(7.5)))
            .await
    );
    let store = client.store();
    let store = store.lock();
    assert_eq!(store.conflicts().unresolved_count(), 1);
    assert_eq!(
        store.conflicts().open_for("Flow").map(|c| c.live_value.clone()),
        Some(TagValue::Number(7.5))
    );
    assert!(store.check_integrity().is_ok());
}

#[tokio::test(start_paused = true)]
async fn broker_reported_conflict_uses_declared_values() {
    let (client, broker) = ready_client().await;
    broker.push(InboundMessage::Conflict {
        tag_name: "Mixer_Speed".into(),
        shadow_value: TagValue::Number(1200.0),
        live_value: TagValue::Number(1150.0),
        timestamp: Utc::now(),
        conflict_type: Some("RANGE_CONFLICT".into()),
        description: Some("speed drift".into()),
    });
    assert!(client.wait_until(WAIT, |s| s.conflicts().len() == 1).await);
    let conflict = client.conflicts().remove(0);
    assert_eq!(conflict.conflict_type, "RANGE_CONFLICT");
    assert_eq!(conflict.description.as_deref(), Some("speed drift"));
}
