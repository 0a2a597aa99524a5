//! In-process broker stand-in.
//!
//! The connector side hands channels to a [`TransportSession`]; the
//! [`BrokerHandle`] side plays the broker: it injects inbound frames, sees
//! every outbound frame and can refuse or drop connections.
//!
//! [`TransportSession`]: super::TransportSession

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Channel, Connector};
use crate::error::TransportError;
use crate::protocol::{InboundMessage, OutboundMessage};

type InboundTx = mpsc::UnboundedSender<Result<InboundMessage, TransportError>>;

struct Shared {
    refuse: bool,
    auto_ack: bool,
    attempts: usize,
    current: Option<InboundTx>,
    sent: mpsc::UnboundedSender<OutboundMessage>,
}

pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
}

pub struct BrokerHandle {
    shared: Arc<Mutex<Shared>>,
    sent: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl MemoryConnector {
    /// A connector whose broker acknowledges `connect_client` and heartbeats.
    pub fn new() -> (Self, BrokerHandle) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared {
            refuse: false,
            auto_ack: true,
            attempts: 0,
            current: None,
            sent: sent_tx,
        }));
        (
            Self {
                shared: shared.clone(),
            },
            BrokerHandle {
                shared,
                sent: sent_rx,
            },
        )
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Channel, TransportError>> {
        let shared = self.shared.clone();
        Box::pin(async move {
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundMessage>();
            let (sent, auto_ack) = {
                let mut state = shared.lock();
                state.attempts += 1;
                if state.refuse {
                    return Err(TransportError::Connect("memory broker refused".into()));
                }
                state.current = Some(in_tx.clone());
                (state.sent.clone(), state.auto_ack)
            };
            // only `current` keeps the connection open; hang_up must end the stream
            let replies = in_tx.downgrade();
            drop(in_tx);

            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    if auto_ack {
                        let reply = match &frame {
                            OutboundMessage::ConnectClient { .. } => Some(InboundMessage::Connect {
                                client_id: Some(format!("mem-{}", Utc::now().timestamp_millis())),
                            }),
                            OutboundMessage::Heartbeat { timestamp } => {
                                Some(InboundMessage::HeartbeatAck {
                                    timestamp: *timestamp,
                                })
                            }
                            _ => None,
                        };
                        if let (Some(reply), Some(tx)) = (reply, replies.upgrade()) {
                            let _ = tx.send(Ok(reply));
                        }
                    }
                    let _ = sent.send(frame);
                }
            });

            let inbound = futures::stream::unfold(in_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed();

            Ok(Channel {
                outbound: out_tx,
                inbound,
            })
        })
    }

    fn describe(&self) -> String {
        "memory://broker".to_string()
    }
}

impl BrokerHandle {
    /// Deliver a frame on the current connection. False when none is open.
    pub fn push(&self, frame: InboundMessage) -> bool {
        let state = self.shared.lock();
        match &state.current {
            Some(tx) => tx.send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    /// Break the current connection with an I/O error.
    pub fn fail(&self, reason: &str) {
        let mut state = self.shared.lock();
        if let Some(tx) = state.current.take() {
            let _ = tx.send(Err(TransportError::Io(reason.to_string())));
        }
    }

    /// Close the current connection cleanly from the broker side.
    pub fn hang_up(&self) {
        self.shared.lock().current = None;
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.shared.lock().refuse = refuse;
    }

    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.shared.lock().auto_ack = auto_ack;
    }

    /// Number of connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.shared.lock().attempts
    }

    pub async fn next_sent(&mut self) -> Option<OutboundMessage> {
        self.sent.recv().await
    }

    /// Everything sent so far, after letting in-flight relays run.
    pub async fn drain_sent(&mut self) -> Vec<OutboundMessage> {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
