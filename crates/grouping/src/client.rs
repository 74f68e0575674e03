//! WebSocket + STOMP handshake against the grouping push broker.
//!
//! [`StompClient`] holds the connection configuration. Call
//! [`StompClient::connect`] to open the WebSocket, exchange
//! `CONNECT`/`CONNECTED`, and obtain a live [`StompConnection`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::channel::ChannelError;
use crate::stomp::{negotiate_heartbeat, parse_frame, Command, Frame, Heartbeat};

/// Raw WebSocket stream type used by the push channel.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait for the broker's `CONNECTED` frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Heart-beat intervals the client asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            outgoing: Duration::from_millis(4000),
            incoming: Duration::from_millis(4000),
        }
    }
}

/// Configuration handle for the STOMP broker endpoint.
#[derive(Debug, Clone)]
pub struct StompClient {
    ws_url: String,
    heartbeat: HeartbeatConfig,
}

/// A live, handshaken STOMP session over WebSocket.
pub struct StompConnection {
    pub ws_stream: WsStream,
    /// Heart-beat intervals agreed with the broker.
    pub heartbeat: Heartbeat,
    /// Broker identification from the `server` header, if sent.
    pub server: Option<String>,
}

impl StompClient {
    /// * `ws_url`    - full broker URL, e.g. `ws://host:8080/ws-grouping`.
    /// * `heartbeat` - requested heart-beat intervals.
    pub fn new(ws_url: impl Into<String>, heartbeat: HeartbeatConfig) -> Self {
        Self {
            ws_url: ws_url.into(),
            heartbeat,
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the WebSocket and perform the STOMP `CONNECT` handshake.
    pub async fn connect(&self) -> Result<StompConnection, ChannelError> {
        let (mut ws_stream, _response) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            ChannelError::Connection(format!(
                "Failed to connect to broker at {}: {e}",
                self.ws_url
            ))
        })?;

        let connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", host_of(&self.ws_url))
            .header(
                "heart-beat",
                format!(
                    "{},{}",
                    self.heartbeat.outgoing.as_millis(),
                    self.heartbeat.incoming.as_millis()
                ),
            );
        ws_stream
            .send(Message::Text(connect.encode()))
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to send CONNECT: {e}")))?;

        let connected = tokio::time::timeout(HANDSHAKE_TIMEOUT, await_connected(&mut ws_stream))
            .await
            .map_err(|_| ChannelError::Protocol("Timed out waiting for CONNECTED".into()))??;

        let heartbeat = negotiate_heartbeat(
            self.heartbeat.outgoing,
            self.heartbeat.incoming,
            connected.get("heart-beat"),
        );
        let server = connected.get("server").map(str::to_string);

        tracing::info!(
            url = %self.ws_url,
            server = server.as_deref().unwrap_or("unknown"),
            send_every_ms = heartbeat.send_every.map(|d| d.as_millis() as u64),
            expect_every_ms = heartbeat.expect_every.map(|d| d.as_millis() as u64),
            "Connected to STOMP broker",
        );

        Ok(StompConnection {
            ws_stream,
            heartbeat,
            server,
        })
    }
}

/// Read frames until `CONNECTED` (success) or `ERROR` (rejection).
async fn await_connected(ws_stream: &mut WsStream) -> Result<Frame, ChannelError> {
    while let Some(msg) = ws_stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(frame)) => {
                return Err(ChannelError::Connection(format!(
                    "Broker closed during handshake: {frame:?}"
                )));
            }
            Ok(_) => continue,
            Err(e) => return Err(ChannelError::Connection(e.to_string())),
        };

        match parse_frame(&text) {
            Ok(Some(frame)) if frame.command == Command::Connected => return Ok(frame),
            Ok(Some(frame)) if frame.command == Command::Error => {
                return Err(ChannelError::Protocol(error_summary(&frame)));
            }
            Ok(_) => continue,
            Err(e) => return Err(ChannelError::Protocol(e.to_string())),
        }
    }
    Err(ChannelError::Connection(
        "Broker closed during handshake".into(),
    ))
}

/// Human-readable description of a broker `ERROR` frame.
pub(crate) fn error_summary(frame: &Frame) -> String {
    match (frame.get("message"), frame.body.trim()) {
        (Some(msg), "") => msg.to_string(),
        (Some(msg), body) => format!("{msg}: {body}"),
        (None, "") => "broker sent ERROR".to_string(),
        (None, body) => body.to_string(),
    }
}

/// `host:port` part of a `ws://` URL, used for the STOMP `host` header.
fn host_of(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_extracted_from_url() {
        assert_eq!(host_of("ws://localhost:8080/ws-grouping"), "localhost:8080");
        assert_eq!(host_of("wss://api.example.org/ws"), "api.example.org");
        assert_eq!(host_of("localhost:8080"), "localhost:8080");
    }

    #[test]
    fn error_summary_combines_message_and_body() {
        let frame = Frame::new(Command::Error)
            .header("message", "Access denied")
            .with_body("no such topic");
        assert_eq!(error_summary(&frame), "Access denied: no such topic");

        let frame = Frame::new(Command::Error);
        assert_eq!(error_summary(&frame), "broker sent ERROR");
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_a_connection_error() {
        let client = StompClient::new("ws://127.0.0.1:1/ws-grouping", HeartbeatConfig::default());
        let err = client.connect().await.err().expect("connect should fail");
        assert!(matches!(err, ChannelError::Connection(_)));
    }
}
