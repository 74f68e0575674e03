//! Per-task status subscription.
//!
//! [`StatusChannel`] owns at most one live subscription. Each
//! subscription runs in its own task: open (with fixed-delay
//! reconnection), parse inbound bodies into [`StatusEvent`]s, hand them to
//! the registered handler, and tear itself down shortly after a terminal
//! status arrives.
//!
//! Handlers live behind a lock that [`StatusChannel::disconnect`] clears,
//! so once `disconnect` returns no handler of that subscription runs
//! again. Handlers are invoked while that lock is held and must not call
//! back into the channel or its [`SubscriptionHandle`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cte_core::status::{parse_status_event, status_topic, StatusEvent, DEFAULT_TOPIC_PREFIX};
use cte_core::types::TaskId;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::reconnect::{open_with_retry, ReconnectConfig};
use crate::transport::{StatusTransport, TransportSession};

/// Upper bound on a graceful transport close during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors surfaced by the push channel.
///
/// None of these is fatal to a run: the fallback timer covers for a
/// silent or broken channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Could not reach the broker, or the connection dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The broker answered with something other than what STOMP allows,
    /// or sent an `ERROR` frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The broker stopped sending heart-beats.
    #[error("Heart-beat timeout")]
    HeartbeatTimeout,

    /// A message body was not a valid status event. Logged, never
    /// delivered to `on_error`.
    #[error("Malformed status payload: {0}")]
    Parse(String),
}

impl ChannelError {
    /// Errors after which the underlying connection is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChannelError::Connection(_) | ChannelError::HeartbeatTimeout
        )
    }
}

/// Timing knobs for a status subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// STOMP destination prefix, `/topic` on the grouping backend.
    pub topic_prefix: String,
    pub reconnect: ReconnectConfig,
    /// How long to keep listening after a terminal status before
    /// disconnecting.
    pub completion_grace: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            reconnect: ReconnectConfig::default(),
            completion_grace: Duration::from_secs(1),
        }
    }
}

type EventHandler = Box<dyn Fn(StatusEvent) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(ChannelError) + Send + Sync>;

struct Handlers {
    on_event: EventHandler,
    on_error: ErrorHandler,
}

/// State shared between a channel, its subscription task and handles.
struct Subscription {
    task_id: TaskId,
    handlers: Mutex<Option<Handlers>>,
    cancel: CancellationToken,
}

impl Subscription {
    fn handlers(&self) -> MutexGuard<'_, Option<Handlers>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_event(&self, event: StatusEvent) {
        if let Some(h) = self.handlers().as_ref() {
            (h.on_event)(event);
        }
    }

    fn emit_error(&self, error: ChannelError) {
        if let Some(h) = self.handlers().as_ref() {
            (h.on_error)(error);
        }
    }

    /// Stop the task and drop the handlers. Idempotent.
    fn close(&self) {
        self.cancel.cancel();
        self.handlers().take();
    }

    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Handle returned by [`StatusChannel::connect`].
///
/// Unsubscribing only ever affects the subscription it was issued for,
/// never a newer one on the same channel.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<Subscription>,
}

impl SubscriptionHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.inner.task_id
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_live()
    }

    pub fn unsubscribe(&self) {
        self.inner.close();
    }
}

struct LiveSubscription {
    inner: Arc<Subscription>,
    task: JoinHandle<()>,
}

/// Push-channel subscription for one task at a time.
pub struct StatusChannel {
    transport: Arc<dyn StatusTransport>,
    config: ChannelConfig,
    live: Option<LiveSubscription>,
}

impl StatusChannel {
    pub fn new(transport: Arc<dyn StatusTransport>, config: ChannelConfig) -> Self {
        Self {
            transport,
            config,
            live: None,
        }
    }

    /// Subscribe to status events for `task_id`.
    ///
    /// Any existing subscription is torn down first. The connection is
    /// established in the background; failures go to `on_error` and are
    /// retried after the configured reconnect delay.
    pub async fn connect<E, R>(&mut self, task_id: TaskId, on_event: E, on_error: R) -> SubscriptionHandle
    where
        E: Fn(StatusEvent) + Send + Sync + 'static,
        R: Fn(ChannelError) + Send + Sync + 'static,
    {
        self.disconnect().await;

        let inner = Arc::new(Subscription {
            task_id: task_id.clone(),
            handlers: Mutex::new(Some(Handlers {
                on_event: Box::new(on_event),
                on_error: Box::new(on_error),
            })),
            cancel: CancellationToken::new(),
        });

        let topic = status_topic(&self.config.topic_prefix, &task_id);
        tracing::info!(task_id = %task_id, topic = %topic, "Connecting status channel");

        let task = tokio::spawn(run_subscription(
            Arc::clone(&self.transport),
            topic,
            Arc::clone(&inner),
            self.config.clone(),
        ));

        self.live = Some(LiveSubscription {
            inner: Arc::clone(&inner),
            task,
        });
        SubscriptionHandle { inner }
    }

    /// Tear down the live subscription, if any.
    ///
    /// Safe to call repeatedly. Once this returns, no handler of the old
    /// subscription will run and its connection has been closed.
    pub async fn disconnect(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };

        let was_live = live.inner.is_live();
        live.inner.close();
        if let Err(e) = live.task.await {
            if e.is_panic() {
                tracing::error!(task_id = %live.inner.task_id, "Status subscription task panicked");
            }
        }
        if was_live {
            tracing::info!(task_id = %live.inner.task_id, "Status channel disconnected");
        }
    }

    /// `true` while a subscription is live (not yet torn down, whether by
    /// `disconnect` or by the post-completion grace timer).
    pub fn is_connected(&self) -> bool {
        self.live.as_ref().is_some_and(|l| l.inner.is_live())
    }

    /// Task the live subscription belongs to.
    pub fn task_id(&self) -> Option<&TaskId> {
        self.live
            .as_ref()
            .filter(|l| l.inner.is_live())
            .map(|l| &l.inner.task_id)
    }
}

impl Drop for StatusChannel {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.inner.close();
        }
    }
}

/// How a single transport session ended.
enum SessionEnd {
    /// Cancelled by `disconnect` or the owning handle.
    Cancelled,
    /// Terminal status seen and the grace delay elapsed (or the broker
    /// went away during it).
    Finished,
    /// Connection lost; reconnect.
    Dropped,
}

/// Subscription task: connect -> pump -> reconnect, until cancelled or
/// finished.
async fn run_subscription(
    transport: Arc<dyn StatusTransport>,
    topic: String,
    sub: Arc<Subscription>,
    config: ChannelConfig,
) {
    // Failed opens back off inside `open_with_retry`; a dropped session
    // waits the initial delay before the first reopen attempt.
    let delay = config.reconnect.initial_delay;

    loop {
        let session = open_with_retry(
            transport.as_ref(),
            &topic,
            &config.reconnect,
            &sub.cancel,
            |e| sub.emit_error(e),
        )
        .await;
        let Some(mut session) = session else {
            return;
        };

        let end = pump(session.as_mut(), &sub, config.completion_grace).await;

        if tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await.is_err() {
            tracing::debug!(topic = %topic, "Transport close timed out");
        }

        match end {
            SessionEnd::Cancelled => return,
            SessionEnd::Finished => {
                tracing::info!(task_id = %sub.task_id, "Disconnecting status channel after completion");
                sub.close();
                return;
            }
            SessionEnd::Dropped => {
                tracing::warn!(
                    task_id = %sub.task_id,
                    delay_ms = delay.as_millis() as u64,
                    "Status channel connection lost, reconnecting",
                );
            }
        }

        tokio::select! {
            biased;
            _ = sub.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Read one session until it ends.
async fn pump(
    session: &mut dyn TransportSession,
    sub: &Subscription,
    grace: Duration,
) -> SessionEnd {
    let mut finish_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = sub.cancel.cancelled() => return SessionEnd::Cancelled,
            _ = tokio::time::sleep_until(finish_at.unwrap_or_else(Instant::now)), if finish_at.is_some() => {
                return SessionEnd::Finished;
            }
            next = session.next_message() => match next {
                None => {
                    return if finish_at.is_some() { SessionEnd::Finished } else { SessionEnd::Dropped };
                }
                Some(Err(e)) => {
                    let fatal = e.is_transport();
                    tracing::warn!(task_id = %sub.task_id, error = %e, "Status channel error");
                    sub.emit_error(e);
                    if fatal {
                        return if finish_at.is_some() { SessionEnd::Finished } else { SessionEnd::Dropped };
                    }
                }
                Some(Ok(body)) => {
                    if let Some(event) = decode(&body, &sub.task_id) {
                        let terminal = event.is_terminal();
                        sub.emit_event(event);
                        if terminal && finish_at.is_none() {
                            finish_at = Some(Instant::now() + grace);
                        }
                    }
                }
            }
        }
    }
}

/// Parse a body and keep it only if it belongs to `task_id`.
fn decode(body: &str, task_id: &TaskId) -> Option<StatusEvent> {
    let event = match parse_status_event(body) {
        Ok(event) => event,
        Err(e) => {
            let err = ChannelError::Parse(e.to_string());
            tracing::warn!(task_id = %task_id, error = %err, raw_message = %body, "Dropping status payload");
            return None;
        }
    };

    if &event.task_id != task_id {
        tracing::warn!(
            task_id = %task_id,
            event_task_id = %event.task_id,
            "Dropping status event for another task",
        );
        return None;
    }

    tracing::debug!(
        task_id = %task_id,
        status = event.status.as_str(),
        progress = event.progress,
        "Status event received",
    );
    Some(event)
}
