//! The client runtime: one session, one dispatcher, one store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dispatch::classify::{classify, classify_frame};
use crate::dispatch::{EventDispatcher, Subscription};
use crate::error::ProtocolViolation;
use crate::event::SyncEvent;
use crate::protocol::{InboundMessage, OutboundMessage, Runtime, TagValue};
use crate::push::{DeploymentEndpoint, PushOrchestrator};
use crate::store::{
    Conflict, ConflictId, ConnectionStatus, Resolution, SharedStore, StoreConfig, SyncStore, TagSample,
};
use crate::transport::{Connector, SessionConfig, TransportSession};

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub session: SessionConfig,
    pub store: StoreConfig,
}

/// Runs the event loop that carries transport events into the store.
///
/// Events are classified and published in the order the session delivers
/// them. The store is the first subscriber, so by the time any other
/// subscriber sees an event the store has already applied it.
pub struct SyncClient {
    session: TransportSession,
    dispatcher: EventDispatcher<SyncEvent>,
    store: SharedStore,
    injector: mpsc::UnboundedSender<InboundMessage>,
    pump: JoinHandle<()>,
    _store_subscription: Subscription<SyncEvent>,
}

impl SyncClient {
    /// Must be called inside a tokio runtime. Nothing connects until
    /// [`connect`](Self::connect).
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let (session, mut transport_rx) = TransportSession::new(connector, config.session);
        let store: SharedStore = Arc::new(Mutex::new(SyncStore::new(config.store)));
        let dispatcher = EventDispatcher::new();

        let sink = store.clone();
        let store_subscription = dispatcher.subscribe(move |event: &SyncEvent| {
            sink.lock().apply(event);
            Ok(())
        });

        let (injector, mut injected_rx) = mpsc::unbounded_channel::<InboundMessage>();
        let fanout = dispatcher.clone();
        let pump = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    Some(event) = transport_rx.recv() => classify(event),
                    Some(frame) = injected_rx.recv() => classify_frame(frame),
                    else => break,
                };
                fanout.publish(&event);
            }
            debug!("client event loop finished");
        });

        Self {
            session,
            dispatcher,
            store,
            injector,
            pump,
            _store_subscription: store_subscription,
        }
    }

    pub async fn connect(&self) {
        self.session.open().await;
    }

    pub fn close(&self) {
        self.session.close();
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription<SyncEvent>
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(handler)
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    /// Feeds frames into the dispatch path as if the broker had sent them.
    /// Used by the polling fallback.
    pub fn injector(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.injector.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.store.lock().status().clone()
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.store.lock().conflicts().iter().cloned().collect()
    }

    /// Event log, newest first.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.store.lock().events().iter().cloned().collect()
    }

    pub fn samples(&self, tag: &str, runtime: Runtime) -> Vec<TagSample> {
        self.store.lock().samples().samples(tag, runtime)
    }

    pub fn resolve_conflict(&self, id: ConflictId, resolution: Resolution) -> Result<Conflict, ProtocolViolation> {
        self.store.lock().resolve_conflict(id, resolution)
    }

    /// Resolve by full id or an unambiguous id prefix.
    pub fn resolve_by_prefix(&self, prefix: &str, resolution: Resolution) -> Option<Result<Conflict, ProtocolViolation>> {
        let mut store = self.store.lock();
        let id = store.conflicts().find_by_prefix(prefix)?.id;
        Some(store.resolve_conflict(id, resolution))
    }

    pub fn resolve_all_conflicts(&self, resolution: Resolution) -> Vec<ConflictId> {
        self.store.lock().resolve_all_conflicts(resolution)
    }

    pub fn simulate_conflicts(&self) -> Vec<ConflictId> {
        self.store.lock().simulate_conflicts()
    }

    /// Write a tag value through the broker. Dropped while disconnected.
    pub fn send_tag_update(&self, name: &str, value: TagValue, runtime: Runtime) -> bool {
        self.session.send(OutboundMessage::TagUpdate {
            name: name.to_string(),
            value,
            runtime,
            timestamp: Utc::now(),
        })
    }

    /// Push orchestration over this client's store and session.
    pub fn orchestrator(&self, endpoint: Arc<dyn DeploymentEndpoint>) -> PushOrchestrator {
        PushOrchestrator::new(self.store.clone(), endpoint).with_transport(self.session.clone())
    }

    /// Wait until `predicate` holds for the store, checking every 10ms.
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&SyncStore) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.store.lock()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.session.close();
        self.pump.abort();
    }
}
