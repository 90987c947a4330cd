//! WebSocket live provider backed by an event relay.
//!
//! The platform's webcast protocol is spoken by a companion relay process which
//! republishes every event as a JSON text frame:
//!
//! ```json
//! {"event": "gift", "data": {"giftName": "Rose", "diamondCount": 1, "user": {"nickname": "Ann"}}}
//! ```
//!
//! The first connection attempt happens inside [`LiveProvider::connect`] so a
//! failure is reported to the caller. Once established, the feed task keeps the
//! socket alive with pings and reconnects with exponential backoff; when the
//! attempts run out the event channel closes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{LiveError, Result};
use crate::event::LiveEvent;
use crate::provider::{ConnectionConfig, LiveConnection, LiveProvider};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Keys that may carry the event name in a relay frame.
const EVENT_NAME_KEYS: &[&str] = &["event", "type", "eventType", "event_type"];

/// Frames that only acknowledge the transport and carry no live event.
const TRANSPORT_EVENTS: &[&str] = &["pong", "ping", "ack", "heartbeat"];

/// Protocol definition for a WebSocket event source.
pub trait LiveProtocol: Send + Sync + 'static {
    /// Platform name (e.g., "tiktok")
    fn platform(&self) -> &str;

    /// Get the WebSocket URL for the account
    fn websocket_url(&self, account_id: &str) -> Result<String>;

    /// Extra headers for the WebSocket upgrade request
    fn headers(&self, _account_id: &str) -> Vec<(String, String)> {
        vec![]
    }

    /// Keep-alive message, if the source needs one
    fn heartbeat_message(&self) -> Option<Message> {
        Some(Message::Ping(Default::default()))
    }

    /// Decode a WebSocket message into live events.
    fn decode_message(&self, message: &Message) -> Result<Vec<LiveEvent>>;
}

/// JSON relay protocol.
#[derive(Debug, Clone)]
pub struct RelayProtocol {
    url_template: String,
}

impl RelayProtocol {
    /// Create a protocol for a relay URL.
    ///
    /// The template may contain `{account}`; otherwise the account is appended as
    /// the `uniqueId` query parameter.
    pub fn new(url_template: impl Into<String>) -> Result<Self> {
        let url_template = url_template.into();
        let sample = url_template.replace("{account}", "account");
        let url = Url::parse(&sample)
            .map_err(|e| LiveError::connection(format!("Invalid relay URL {url_template}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LiveError::connection(format!(
                "Relay URL must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        Ok(Self { url_template })
    }

    fn decode_text(&self, text: &str) -> Result<Vec<LiveEvent>> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| LiveError::protocol(format!("Invalid relay frame: {e}")))?;

        let frames = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut events = Vec::with_capacity(frames.len());
        for frame in frames {
            let Some(object) = frame.as_object() else {
                warn!("Skipping relay entry that is not a JSON object");
                continue;
            };
            let Some(name) = EVENT_NAME_KEYS
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_str))
            else {
                warn!("Skipping relay entry without an event name");
                continue;
            };
            if TRANSPORT_EVENTS.iter().any(|t| name.eq_ignore_ascii_case(t)) {
                trace!(event = name, "Relay transport frame");
                continue;
            }

            let payload = object.get("data").cloned().unwrap_or_else(|| frame.clone());
            events.push(LiveEvent::from_named(name, payload));
        }
        Ok(events)
    }
}

impl LiveProtocol for RelayProtocol {
    fn platform(&self) -> &str {
        "tiktok"
    }

    fn websocket_url(&self, account_id: &str) -> Result<String> {
        if self.url_template.contains("{account}") {
            let encoded: String = url::form_urlencoded::byte_serialize(account_id.as_bytes()).collect();
            return Ok(self.url_template.replace("{account}", &encoded));
        }

        let mut url = Url::parse(&self.url_template)
            .map_err(|e| LiveError::connection(format!("Invalid relay URL: {e}")))?;
        url.query_pairs_mut().append_pair("uniqueId", account_id);
        Ok(url.to_string())
    }

    fn decode_message(&self, message: &Message) -> Result<Vec<LiveEvent>> {
        match message {
            Message::Text(text) => self.decode_text(text.as_str()),
            Message::Binary(data) => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| LiveError::protocol(format!("Binary frame is not UTF-8: {e}")))?;
                self.decode_text(text)
            }
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => Ok(vec![]),
        }
    }
}

/// A generic WebSocket live provider.
pub struct WebSocketLiveProvider<P> {
    protocol: P,
}

impl<P: LiveProtocol + Clone> WebSocketLiveProvider<P> {
    pub fn with_protocol(protocol: P) -> Self {
        Self { protocol }
    }

    async fn open(protocol: &P, url: &str, account_id: &str) -> Result<WsStream> {
        let mut request = url.into_client_request()?;
        for (name, value) in protocol.headers(account_id) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| LiveError::connection(format!("Invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| LiveError::connection(format!("Invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _) = connect_async(request).await?;
        Ok(stream)
    }
}

/// Outcome of driving one established socket.
enum StreamEnd {
    Shutdown,
    Lost,
}

async fn drive_stream<P: LiveProtocol>(
    protocol: &P,
    stream: &mut WsStream,
    account_id: &str,
    heartbeat_interval: Duration,
    event_tx: &mpsc::Sender<LiveEvent>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> StreamEnd {
    let heartbeat_enabled = protocol.heartbeat_message().is_some();
    let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
    heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = heartbeat_timer.tick(), if heartbeat_enabled => {
                if let Some(msg) = protocol.heartbeat_message() {
                    if let Err(e) = stream.send(msg).await {
                        error!("Failed to send heartbeat: {}", e);
                        return StreamEnd::Lost;
                    }
                    trace!("Sent heartbeat for {}", account_id);
                }
            }

            msg_opt = stream.next() => {
                match msg_opt {
                    Some(Ok(msg)) => {
                        match protocol.decode_message(&msg) {
                            Ok(events) => {
                                for event in events {
                                    if event_tx.send(event).await.is_err() {
                                        // Session side is gone
                                        return StreamEnd::Shutdown;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Failed to decode message: {}", e);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        return StreamEnd::Lost;
                    }
                    None => {
                        warn!("WebSocket stream closed");
                        return StreamEnd::Lost;
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                let _ = stream.close(None).await;
                return StreamEnd::Shutdown;
            }
        }
    }
}

#[async_trait]
impl<P: LiveProtocol + Clone> LiveProvider for WebSocketLiveProvider<P> {
    fn platform(&self) -> &str {
        self.protocol.platform()
    }

    async fn connect(&self, account_id: &str, config: &ConnectionConfig) -> Result<LiveConnection> {
        let url = self.protocol.websocket_url(account_id)?;
        info!("Connecting to relay: {}", url);
        let first = Self::open(&self.protocol, &url, account_id).await?;
        info!("Connected to relay for {}", account_id);

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let protocol = self.protocol.clone();
        let reconnect = config.reconnect;
        let heartbeat_interval = config.heartbeat_interval;
        let account = account_id.to_string();

        let handle = tokio::spawn(async move {
            let mut current_stream = Some(first);
            let mut attempt = 0;
            let mut delay = reconnect.base_reconnect_delay_ms;

            loop {
                if let Some(mut stream) = current_stream.take() {
                    match drive_stream(
                        &protocol,
                        &mut stream,
                        &account,
                        heartbeat_interval,
                        &event_tx,
                        &mut shutdown_rx,
                    )
                    .await
                    {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Lost => {}
                    }
                }

                if attempt >= reconnect.max_reconnect_attempts {
                    error!("Max reconnect attempts reached for {}", account);
                    break;
                }
                attempt += 1;

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {},
                    _ = shutdown_rx.recv() => break,
                }
                delay = reconnect.next_delay(delay);

                match Self::open(&protocol, &url, &account).await {
                    Ok(stream) => {
                        info!("Reconnected to relay for {} (attempt {})", account, attempt);
                        attempt = 0;
                        delay = reconnect.base_reconnect_delay_ms;
                        current_stream = Some(stream);
                    }
                    Err(e) => {
                        warn!("Reconnect attempt {} failed: {}", attempt, e);
                    }
                }
            }
            debug!("Relay task for {} stopped", account);
        });

        let connection_id = format!("{}-{}-{}", self.platform(), account_id, uuid::Uuid::new_v4());
        Ok(
            LiveConnection::new(connection_id, self.platform(), account_id, event_rx)
                .with_shutdown(shutdown_tx)
                .with_tasks(vec![handle]),
        )
    }
}

/// Create the relay-backed provider for a relay URL.
pub fn create_relay_provider(url_template: &str) -> Result<WebSocketLiveProvider<RelayProtocol>> {
    Ok(WebSocketLiveProvider::with_protocol(RelayProtocol::new(url_template)?))
}
