//! Push feed of document change events over WebSocket.
//!
//! The coordination service sends one JSON text frame per change:
//! `{"service": "<name>", "event": "created", "data": {...}}`. Frames
//! are parsed into [`ServiceEvent`]s and fanned out on a broadcast
//! channel. A dropped connection ends the feed; there is no automatic
//! reconnect.

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::store::{DataStoreError, ServiceEvent, ServiceEventKind};

/// A live WebSocket connection to the feed endpoint.
pub type FeedStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Path segment appended to the store location to form the default feed URL.
const FEED_PATH: &str = "feed";

/// Wire shape of a single feed frame.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedMessage {
    pub service: String,
    pub event: ServiceEventKind,
    pub data: serde_json::Value,
}

impl From<FeedMessage> for ServiceEvent {
    fn from(msg: FeedMessage) -> Self {
        ServiceEvent::new(msg.service, msg.event, msg.data)
    }
}

/// Parse a feed text frame.
///
/// Returns `Err` for malformed JSON or unknown event kinds. Callers
/// should log and continue.
pub fn parse_frame(text: &str) -> Result<FeedMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Derive the default feed URL from a store location that ends in `/`.
///
/// `http://` becomes `ws://`, `https://` becomes `wss://`, and the
/// `feed` path segment is appended.
pub fn feed_url_for(location: &str) -> String {
    let ws_location = if let Some(rest) = location.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = location.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        location.to_string()
    };
    format!("{ws_location}{FEED_PATH}")
}

/// Open the WebSocket feed at `url`.
pub async fn open(url: &str) -> Result<FeedStream, DataStoreError> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| DataStoreError::Feed(format!("Failed to connect to feed at {url}: {e}")))?;

    tracing::info!(url, "Connected to coordination service feed");
    Ok(ws_stream)
}

/// Read frames until the socket closes, a receive error occurs, or
/// `cancel` fires. Each parsed frame is published on `event_tx`.
pub async fn run_feed(
    mut ws_stream: FeedStream,
    event_tx: broadcast::Sender<ServiceEvent>,
    cancel: CancellationToken,
) {
    loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Feed cancelled, closing socket");
                let _ = ws_stream.close(None).await;
                return;
            }
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => {
                    tracing::warn!("Coordination service feed exhausted");
                    return;
                }
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => match parse_frame(&text) {
                Ok(msg) => {
                    tracing::trace!(service = %msg.service, event = ?msg.event, "Feed event");
                    // Zero receivers is fine: nobody is listening yet.
                    let _ = event_tx.send(msg.into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, raw_message = %text, "Failed to parse feed frame");
                }
            },
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::warn!(?frame, "Coordination service closed the feed");
                return;
            }
            Ok(Message::Binary(_) | Message::Frame(_)) => {
                tracing::trace!("Ignoring non-text feed frame");
            }
            Err(e) => {
                tracing::error!(error = %e, "Feed receive error");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_created_frame() {
        let json = r#"{"service":"training_server_training_service","event":"created","data":{"_id":"j1","worker_id":"w"}}"#;
        let msg = parse_frame(json).unwrap();
        assert_eq!(msg.service, "training_server_training_service");
        assert_eq!(msg.event, ServiceEventKind::Created);
        assert_eq!(msg.data["_id"], "j1");
    }

    #[test]
    fn parse_removed_frame() {
        let json = r#"{"service":"s","event":"removed","data":{"_id":"x"}}"#;
        assert_eq!(parse_frame(json).unwrap().event, ServiceEventKind::Removed);
    }

    #[test]
    fn parse_unknown_event_returns_error() {
        let json = r#"{"service":"s","event":"exploded","data":{}}"#;
        assert!(parse_frame(json).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_frame("not json at all").is_err());
    }

    #[test]
    fn feed_message_converts_to_event() {
        let msg = parse_frame(r#"{"service":"jobs","event":"created","data":{"a":1}}"#).unwrap();
        let event: ServiceEvent = msg.into();
        assert!(event.is_created_in("jobs"));
        assert!(!event.is_created_in("workers"));
    }

    #[test]
    fn feed_url_swaps_scheme() {
        assert_eq!(feed_url_for("http://localhost:3030/"), "ws://localhost:3030/feed");
        assert_eq!(feed_url_for("https://api.example.com/v1/"), "wss://api.example.com/v1/feed");
        assert_eq!(feed_url_for("ws://host/"), "ws://host/feed");
    }
}
