use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shadow_sync::broker::{self, BrokerState};
use shadow_sync::push::StaticToken;
use shadow_sync::transport::SessionConfig;
use shadow_sync::{
    ClientConfig, EventPayload, HttpDeployment, InboundMessage, Preview, Resolution, Runtime, SyncClient,
    SyncStore, TagValue, WsConnector,
};
use tokio::net::TcpListener;

async fn start_broker() -> (String, BrokerState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    let state = BrokerState::default();
    let serving = state.clone();
    tokio::spawn(async move {
        let _ = broker::serve(listener, serving).await;
    });
    (addr.to_string(), state)
}

fn client_for(addr: &str) -> SyncClient {
    let connector = WsConnector::new(&format!("ws://{addr}/ws")).unwrap();
    let config = ClientConfig {
        session: SessionConfig {
            heartbeat_interval: Duration::from_millis(100),
            reconnect_delay: Duration::from_millis(200),
            project_id: Some("line-3".into()),
            ..SessionConfig::default()
        },
        ..ClientConfig::default()
    };
    SyncClient::new(Arc::new(connector), config)
}

/// The broker acknowledged registration, so its hub subscription exists.
fn registered(store: &SyncStore) -> bool {
    store
        .events()
        .iter()
        .any(|e| matches!(&e.payload, EventPayload::Connected { client_id: Some(_) }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_session_registers_and_measures_latency() {
    let (addr, state) = start_broker().await;
    let client = client_for(&addr);
    client.connect().await;

    assert!(client.wait_until(Duration::from_secs(3), registered).await);
    assert_eq!(state.clients.len(), 1);

    let heartbeat_seen = client
        .wait_until(Duration::from_secs(3), |s| {
            s.events()
                .iter()
                .any(|e| matches!(e.payload, EventPayload::Heartbeat { .. }))
        })
        .await;
    assert!(heartbeat_seen, "no heartbeat acknowledgment arrived");
    assert!(client.status().connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_broadcast_detects_conflict_and_push_clears_it() {
    let (addr, state) = start_broker().await;
    let client = client_for(&addr);
    client.connect().await;
    assert!(client.wait_until(Duration::from_secs(3), registered).await);

    state.publish(InboundMessage::SyncStatusUpdate {
        shadow_ok: Some(true),
        live_ok: Some(true),
        execution_mode: None,
    });
    for (runtime, value) in [(Runtime::Shadow, 50.0), (Runtime::Live, 48.0)] {
        state.publish(InboundMessage::TagUpdate {
            name: "Tank_Level".into(),
            value: TagValue::Number(value),
            runtime,
            timestamp: Utc::now(),
        });
    }
    assert!(
        client
            .wait_until(Duration::from_secs(3), |s| s.status().shadow_ok
                && s.conflicts().open_for("Tank_Level").is_some())
            .await
    );

    state
        .logic
        .insert(("logic-1".into(), Runtime::Shadow), "LD Start\nOUT Pump\n".into());
    let endpoint = Arc::new(HttpDeployment::new(&format!("http://{addr}"), Arc::new(StaticToken(None))).unwrap());
    let orchestrator = client.orchestrator(endpoint.clone());

    assert!(matches!(
        orchestrator.preview_changes("logic-1").await.unwrap(),
        Preview::ResolveConflicts(ref open) if open.len() == 1
    ));
    assert!(orchestrator.push_to_live("logic-1").await.unwrap_err().is_policy_violation());

    let id = client.conflicts()[0].id;
    client.resolve_conflict(id, Resolution::Shadow).unwrap();

    let Preview::Ready(preview) = orchestrator.preview_changes("logic-1").await.unwrap() else {
        panic!("expected a diff once conflicts are resolved");
    };
    assert_eq!(preview.insertions, 2);
    let receipt = orchestrator.commit(preview.confirm()).await.unwrap();

    assert!(client.conflicts().is_empty());
    assert_eq!(client.status().last_sync_at, Some(receipt.committed_at));
    assert_eq!(
        state.logic.get(&("logic-1".to_string(), Runtime::Live)).map(|s| s.value().clone()),
        Some("LD Start\nOUT Pump\n".to_string())
    );

    let snapshot = endpoint.fetch_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|s| s.name == "Tank_Level"));

    // the broker announces the push to every client
    assert!(
        client
            .wait_until(Duration::from_secs(3), |s| s
                .events()
                .iter()
                .filter(|e| matches!(e.payload, EventPayload::PushResponse { success: true, .. }))
                .count()
                >= 2)
            .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_tag_writes_are_relayed() {
    let (addr, state) = start_broker().await;
    let writer = client_for(&addr);
    let reader = client_for(&addr);
    writer.connect().await;
    reader.connect().await;
    assert!(writer.wait_until(Duration::from_secs(3), registered).await);
    assert!(reader.wait_until(Duration::from_secs(3), registered).await);

    assert!(writer.send_tag_update("Valve_Open", TagValue::Bool(true), Runtime::Live));
    assert!(
        reader
            .wait_until(Duration::from_secs(3), |s| s
                .tag("Valve_Open")
                .and_then(|pair| pair.live.clone())
                == Some(TagValue::Bool(true)))
            .await
    );
    assert!(state.tags.contains_key(&("Valve_Open".to_string(), Runtime::Live)));
}
