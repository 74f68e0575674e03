//! Transport seam under the status channel.
//!
//! A [`StatusTransport`] opens one topic subscription and yields raw
//! message bodies through a [`TransportSession`]. The production
//! implementation is [`stomp::StompTransport`]; [`memory::MemoryBroker`]
//! is an in-process broker for tests and offline runs.

pub mod memory;
pub mod stomp;

use async_trait::async_trait;

use crate::channel::ChannelError;

/// Opens topic subscriptions on some push-notification broker.
#[async_trait]
pub trait StatusTransport: Send + Sync + 'static {
    /// Connect and subscribe to `topic`.
    async fn open(&self, topic: &str) -> Result<Box<dyn TransportSession>, ChannelError>;
}

/// One live subscription on one connection.
#[async_trait]
pub trait TransportSession: Send {
    /// Next message body.
    ///
    /// `None` means the connection ended; an `Err` carrying a transport
    /// failure ([`ChannelError::is_transport`]) also ends the session.
    /// Must be cancel-safe.
    async fn next_message(&mut self) -> Option<Result<String, ChannelError>>;

    /// Unsubscribe and close the connection. Errors are logged, not returned.
    async fn close(&mut self);
}
