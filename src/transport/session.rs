use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Connector, TransportEvent};
use crate::error::TransportError;
use crate::protocol::{InboundMessage, OutboundMessage};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub client_type: String,
    pub project_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            client_type: "desktop".to_string(),
            project_id: None,
        }
    }
}

/// Latency for a heartbeat acknowledgment echoing `ack_ms`, never negative.
pub fn latency_since(ack_ms: i64, now_ms: i64) -> u64 {
    now_ms.saturating_sub(ack_ms).max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Connecting,
    Connected,
}

#[derive(Default)]
struct Link {
    phase: Phase,
    /// Cleared by `close`; reconnects only happen while set.
    alive: bool,
    /// Bumped on every teardown so stale tasks can tell they lost the link.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Mutex<Link>,
}

/// One logical broker connection over any number of physical reconnects.
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<Inner>,
}

impl TransportSession {
    /// Create a session and the stream its lifecycle events arrive on.
    pub fn new(
        connector: Arc<dyn Connector>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            config,
            connector,
            events,
            link: Mutex::new(Link::default()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Establish the channel. No-op while connecting or connected.
    ///
    /// A failed attempt is reported as an `Error` event and schedules a
    /// reconnect; it is never returned to the caller.
    pub async fn open(&self) {
        let generation = {
            let mut link = self.inner.link.lock();
            link.alive = true;
            if link.phase != Phase::Idle {
                debug!(phase = ?link.phase, "open ignored: connection already in progress");
                return;
            }
            link.phase = Phase::Connecting;
            link.generation
        };
        Inner::establish(&self.inner, generation).await;
    }

    /// Tear down the channel and cancel heartbeat and reconnect timers.
    pub fn close(&self) {
        let mut link = self.inner.link.lock();
        let was_connected = link.phase == Phase::Connected;
        link.alive = false;
        link.generation += 1;
        link.phase = Phase::Idle;
        link.outbound = None;
        for task in [link.reader.take(), link.heartbeat.take(), link.reconnect.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        if was_connected {
            info!("broker session closed");
            self.inner.emit(TransportEvent::Closed {
                reason: "closed by client".to_string(),
            });
        }
    }

    /// Hand a frame to the current channel. Frames are never queued: while
    /// disconnected the frame is logged and dropped and `false` is returned.
    pub fn send(&self, frame: OutboundMessage) -> bool {
        let link = self.inner.link.lock();
        Inner::send_on(&link, frame)
    }

    /// Arm the reconnect timer unless one is already pending.
    /// Returns whether a new timer was armed.
    pub fn schedule_reconnect(&self) -> bool {
        let mut link = self.inner.link.lock();
        if !link.alive {
            return false;
        }
        self.inner.arm_reconnect(&mut link)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.lock().phase == Phase::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.link.lock().reconnect.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl Inner {
    fn emit(&self, event: TransportEvent) {
        // receiver gone means the owning client shut down
        let _ = self.events.send(event);
    }

    fn send_on(link: &Link, frame: OutboundMessage) -> bool {
        match (&link.phase, &link.outbound) {
            (Phase::Connected, Some(tx)) => {
                let kind = frame.kind();
                if tx.send(frame).is_err() {
                    warn!(kind, "outbound channel closed; frame dropped");
                    return false;
                }
                debug!(kind, "frame sent");
                true
            }
            _ => {
                warn!(kind = frame.kind(), "not connected; frame dropped");
                false
            }
        }
    }

    async fn establish(self: &Arc<Self>, generation: u64) {
        let target = self.connector.describe();
        debug!(%target, "connecting to broker");
        let result = self.connector.connect().await;

        let mut link = self.link.lock();
        if !link.alive || link.generation != generation || link.phase != Phase::Connecting {
            debug!(%target, "connection attempt superseded; discarding");
            return;
        }

        match result {
            Ok(channel) => {
                link.phase = Phase::Connected;
                link.outbound = Some(channel.outbound);
                if let Some(pending) = link.reconnect.take() {
                    pending.abort();
                }
                info!(%target, "broker session open");
                self.emit(TransportEvent::Opened);

                link.reader = Some(tokio::spawn(Arc::clone(self).read_loop(generation, channel.inbound)));
                link.heartbeat = Some(tokio::spawn(Arc::clone(self).heartbeat_loop(generation)));

                Self::send_on(&link, OutboundMessage::connect_client(self.config.client_type.clone()));
                if let Some(project_id) = &self.config.project_id {
                    Self::send_on(
                        &link,
                        OutboundMessage::ProjectConnect {
                            project_id: project_id.clone(),
                        },
                    );
                }
            }
            Err(err) => {
                warn!(%target, error = %err, "broker connection failed");
                link.phase = Phase::Idle;
                self.emit(TransportEvent::Error(err));
                self.arm_reconnect(&mut link);
            }
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        mut inbound: BoxStream<'static, Result<InboundMessage, TransportError>>,
    ) {
        while let Some(item) = inbound.next().await {
            match item {
                Ok(InboundMessage::HeartbeatAck { timestamp }) => {
                    let latency_ms = latency_since(timestamp, Utc::now().timestamp_millis());
                    self.emit(TransportEvent::Heartbeat { latency_ms });
                }
                Ok(frame) => {
                    debug!(kind = frame.kind(), "frame received");
                    self.emit(TransportEvent::Frame(frame));
                }
                Err(TransportError::Closed(reason)) => {
                    self.lost(generation, reason);
                    return;
                }
                Err(err) => {
                    self.lost(generation, err.to_string());
                    return;
                }
            }
        }
        self.lost(generation, "broker closed the connection".to_string());
    }

    async fn heartbeat_loop(self: Arc<Self>, generation: u64) {
        let period = self.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let link = self.link.lock();
            if link.generation != generation || link.phase != Phase::Connected {
                return;
            }
            Self::send_on(&link, OutboundMessage::heartbeat_now());
        }
    }

    /// The physical channel of `generation` is gone. A read error is folded
    /// into `reason`, so one drop yields exactly one `Closed` event.
    fn lost(self: &Arc<Self>, generation: u64, reason: String) {
        let mut link = self.link.lock();
        if link.generation != generation || link.phase != Phase::Connected {
            return;
        }
        link.generation += 1;
        link.phase = Phase::Idle;
        link.outbound = None;
        // called from the reader itself, so detach rather than abort
        link.reader.take();
        if let Some(heartbeat) = link.heartbeat.take() {
            heartbeat.abort();
        }

        warn!(%reason, "broker connection lost");
        self.emit(TransportEvent::Closed { reason });

        if link.alive {
            self.arm_reconnect(&mut link);
        }
    }

    fn arm_reconnect(self: &Arc<Self>, link: &mut Link) -> bool {
        if link.reconnect.is_some() {
            debug!("reconnect already scheduled");
            return false;
        }
        let delay = self.config.reconnect_delay;
        let inner = Arc::clone(self);
        link.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let generation = {
                let mut link = inner.link.lock();
                link.reconnect = None;
                if !link.alive || link.phase != Phase::Idle {
                    return;
                }
                link.phase = Phase::Connecting;
                link.generation
            };
            info!(target = %inner.connector.describe(), "reconnecting to broker");
            inner.establish(generation).await;
        }));
        info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        true
    }
}
