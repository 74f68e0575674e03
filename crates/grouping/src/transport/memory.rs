//! In-process broker implementing [`StatusTransport`].
//!
//! Each [`MemoryBroker::open`] creates a session fed by an unbounded
//! channel. Tests publish bodies, inject transport errors, or drop
//! sessions to simulate the broker going away. The broker keeps an
//! ordered log of opens and closes so subscription lifecycles can be
//! asserted on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::ChannelError;
use crate::transport::{StatusTransport, TransportSession};

/// Lifecycle entry recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerLog {
    Opened(String),
    Closed(String),
}

/// Shared, cloneable in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    sessions: Vec<SessionEntry>,
    log: Vec<BrokerLog>,
    reject_opens: usize,
    next_id: u64,
}

struct SessionEntry {
    id: u64,
    topic: String,
    tx: mpsc::UnboundedSender<Result<String, ChannelError>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `body` to every live session on `topic`. Returns the number
    /// of sessions reached.
    pub fn publish(&self, topic: &str, body: impl Into<String>) -> usize {
        let body = body.into();
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.topic == topic)
            .filter(|s| s.tx.send(Ok(body.clone())).is_ok())
            .count()
    }

    /// Deliver a transport error to every live session on `topic`.
    pub fn inject_error(&self, topic: &str, error: ChannelError) -> usize {
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.topic == topic)
            .filter(|s| s.tx.send(Err(error.clone())).is_ok())
            .count()
    }

    /// Sever every session on `topic`, as if the connection dropped.
    pub fn drop_sessions(&self, topic: &str) {
        let mut state = self.lock();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.topic != topic);
        let dropped = before - state.sessions.len();
        for _ in 0..dropped {
            state.log.push(BrokerLog::Closed(topic.to_string()));
        }
    }

    /// Make the next `n` calls to `open` fail with a connection error.
    pub fn reject_next_opens(&self, n: usize) {
        self.lock().reject_opens = n;
    }

    /// Number of live sessions subscribed to `topic`.
    pub fn live_sessions(&self, topic: &str) -> usize {
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    /// Number of live sessions across all topics.
    pub fn total_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Ordered history of opens and closes.
    pub fn log(&self) -> Vec<BrokerLog> {
        self.lock().log.clone()
    }

    fn remove(&self, id: u64) {
        let mut state = self.lock();
        if let Some(pos) = state.sessions.iter().position(|s| s.id == id) {
            let entry = state.sessions.remove(pos);
            state.log.push(BrokerLog::Closed(entry.topic));
        }
    }
}

#[async_trait]
impl StatusTransport for MemoryBroker {
    async fn open(&self, topic: &str) -> Result<Box<dyn TransportSession>, ChannelError> {
        let mut state = self.lock();
        if state.reject_opens > 0 {
            state.reject_opens -= 1;
            return Err(ChannelError::Connection(format!(
                "memory broker rejected subscription to {topic}"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_id;
        state.next_id += 1;
        state.sessions.push(SessionEntry {
            id,
            topic: topic.to_string(),
            tx,
        });
        state.log.push(BrokerLog::Opened(topic.to_string()));

        Ok(Box::new(MemorySession {
            id,
            rx,
            broker: self.clone(),
        }))
    }
}

/// Session handed out by [`MemoryBroker`]. Dropping it unsubscribes.
pub struct MemorySession {
    id: u64,
    rx: mpsc::UnboundedReceiver<Result<String, ChannelError>>,
    broker: MemoryBroker,
}

#[async_trait]
impl TransportSession for MemorySession {
    async fn next_message(&mut self) -> Option<Result<String, ChannelError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.broker.remove(self.id);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.broker.remove(self.id);
    }
}
