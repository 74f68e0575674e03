//! STOMP-over-WebSocket implementation of [`StatusTransport`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;

use crate::channel::ChannelError;
use crate::client::{error_summary, StompClient, WsStream};
use crate::stomp::{parse_frame, Command, Frame, Heartbeat, HEARTBEAT};
use crate::transport::{StatusTransport, TransportSession};

/// Subscription id used on every connection; one topic per connection.
const SUBSCRIPTION_ID: &str = "sub-0";

/// Missed incoming heart-beats tolerated before the link is declared dead.
const INCOMING_TOLERANCE: u32 = 2;

/// Opens one STOMP connection per subscription.
#[derive(Debug, Clone)]
pub struct StompTransport {
    client: StompClient,
}

impl StompTransport {
    pub fn new(client: StompClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusTransport for StompTransport {
    async fn open(&self, topic: &str) -> Result<Box<dyn TransportSession>, ChannelError> {
        let conn = self.client.connect().await?;
        let mut session = StompSession {
            ws: conn.ws_stream,
            heartbeat: conn.heartbeat,
            topic: topic.to_string(),
            last_received: Instant::now(),
            next_send: conn.heartbeat.send_every.map(|d| Instant::now() + d),
            closed: false,
        };
        session.subscribe().await?;
        Ok(Box::new(session))
    }
}

/// A subscribed STOMP connection.
pub struct StompSession {
    ws: WsStream,
    heartbeat: Heartbeat,
    topic: String,
    last_received: Instant,
    next_send: Option<Instant>,
    closed: bool,
}

impl StompSession {
    async fn subscribe(&mut self) -> Result<(), ChannelError> {
        let frame = Frame::new(Command::Subscribe)
            .header("id", SUBSCRIPTION_ID)
            .header("destination", self.topic.as_str())
            .header("ack", "auto");
        self.ws
            .send(Message::Text(frame.encode()))
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to send SUBSCRIBE: {e}")))?;
        tracing::info!(topic = %self.topic, "Subscribed to status topic");
        Ok(())
    }

    /// Interpret one inbound text payload. `None` means "nothing for the
    /// caller, keep reading".
    fn handle_text(&self, text: &str) -> Option<Result<String, ChannelError>> {
        match parse_frame(text) {
            Ok(None) => {
                tracing::trace!(topic = %self.topic, "Heart-beat received");
                None
            }
            Ok(Some(frame)) => match frame.command {
                Command::Message => match frame.get("subscription") {
                    Some(id) if id != SUBSCRIPTION_ID => {
                        tracing::debug!(subscription = id, "Ignoring MESSAGE for unknown subscription");
                        None
                    }
                    _ => Some(Ok(frame.body)),
                },
                Command::Error => Some(Err(ChannelError::Protocol(error_summary(&frame)))),
                other => {
                    tracing::debug!(command = %other, "Ignoring STOMP frame");
                    None
                }
            },
            Err(e) => Some(Err(ChannelError::Protocol(format!("Malformed STOMP frame: {e}")))),
        }
    }
}

#[async_trait]
impl TransportSession for StompSession {
    async fn next_message(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            if self.closed {
                return None;
            }

            let send_at = self.next_send;
            let expect_by = self
                .heartbeat
                .expect_every
                .map(|d| self.last_received + d * INCOMING_TOLERANCE);

            tokio::select! {
                msg = self.ws.next() => {
                    self.last_received = Instant::now();
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(topic = %self.topic, ?frame, "Broker closed WebSocket");
                            self.closed = true;
                            return None;
                        }
                        Some(Err(e)) => {
                            self.closed = true;
                            return Some(Err(ChannelError::Connection(e.to_string())));
                        }
                        None => {
                            self.closed = true;
                            return None;
                        }
                    };
                    if let Some(result) = self.handle_text(&text) {
                        return Some(result);
                    }
                }
                _ = sleep_until(send_at.unwrap_or_else(Instant::now)), if send_at.is_some() => {
                    if let Err(e) = self.ws.send(Message::Text(HEARTBEAT.to_string())).await {
                        self.closed = true;
                        return Some(Err(ChannelError::Connection(format!("Failed to send heart-beat: {e}"))));
                    }
                    self.next_send = self.heartbeat.send_every.map(|d| Instant::now() + d);
                }
                _ = sleep_until(expect_by.unwrap_or_else(Instant::now)), if expect_by.is_some() => {
                    tracing::warn!(topic = %self.topic, "No heart-beat from broker");
                    self.closed = true;
                    return Some(Err(ChannelError::HeartbeatTimeout));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let unsubscribe = Frame::new(Command::Unsubscribe).header("id", SUBSCRIPTION_ID);
        let disconnect = Frame::new(Command::Disconnect);
        for frame in [unsubscribe, disconnect] {
            if let Err(e) = self.ws.send(Message::Text(frame.encode())).await {
                tracing::debug!(topic = %self.topic, error = %e, "Failed to send {}", frame.command);
                break;
            }
        }
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(topic = %self.topic, error = %e, "WebSocket close failed");
        }
        tracing::info!(topic = %self.topic, "Status subscription closed");
    }
}
