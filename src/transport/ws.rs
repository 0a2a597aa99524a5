use futures::future::{self, BoxFuture};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::{Channel, Connector};
use crate::error::TransportError;
use crate::protocol::{self, InboundMessage, OutboundMessage};

/// WebSocket connection to the sync broker.
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::Connect(format!("invalid ws url: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(TransportError::Connect(format!("unsupported scheme '{other}'"))),
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Channel, TransportError>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (mut ws_tx, ws_rx) = ws_stream.split();

            // Spawn writer for local -> broker; ends when the session drops its sender
            let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
            tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    match protocol::encode(&frame) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(kind = frame.kind(), error = %err, "failed to encode frame"),
                    }
                }
                let _ = ws_tx.close().await;
            });

            // broker -> local
            let inbound = ws_rx
                .filter_map(|msg| {
                    future::ready(match msg {
                        Ok(Message::Text(text)) => decode_logged(text.as_str()),
                        Ok(Message::Binary(bin)) => match std::str::from_utf8(&bin) {
                            Ok(text) => decode_logged(text),
                            Err(_) => {
                                warn!(len = bin.len(), "ignoring non-utf8 binary frame");
                                None
                            }
                        },
                        Ok(Message::Close(frame)) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "broker closed the connection".to_string());
                            Some(Err(TransportError::Closed(reason)))
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                        Err(err) => Some(Err(TransportError::Io(err.to_string()))),
                    })
                })
                .boxed();

            Ok(Channel {
                outbound: tx,
                inbound,
            })
        })
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Undecodable frames are skipped; they never end the session.
fn decode_logged(text: &str) -> Option<Result<InboundMessage, TransportError>> {
    match protocol::decode(text) {
        Ok(frame) => Some(Ok(frame)),
        Err(err) => {
            debug!(frame = %text, "undecodable frame");
            warn!(error = %err, "skipping broker frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_http_scheme() {
        assert!(WsConnector::new("ws://127.0.0.1:3000/ws").is_ok());
        assert!(WsConnector::new("http://127.0.0.1:3000/ws").is_err());
        assert!(WsConnector::new("not a url").is_err());
    }

    #[test]
    fn test_garbage_frames_are_skipped() {
        assert!(decode_logged("{\"type\":\"nope\"}").is_none());
        assert!(matches!(
            decode_logged("{\"type\":\"heartbeat_ack\",\"timestamp\":5}"),
            Some(Ok(InboundMessage::HeartbeatAck { timestamp: 5 }))
        ));
    }
}
