//! Reconnection policy for the status channel.
//!
//! The push broker is re-dialled after a fixed delay by default
//! (`multiplier = 1.0`); a multiplier above one turns this into capped
//! exponential backoff.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channel::ChannelError;
use crate::transport::{StatusTransport, TransportSession};

/// Tunable parameters for the reconnection strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl ReconnectConfig {
    /// Always wait exactly `delay` between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

/// Calculate the next delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Open a subscription on `topic`, retrying until it succeeds.
///
/// Every failed attempt is passed to `on_error`. Returns `None` if
/// `cancel` fires first.
pub async fn open_with_retry<F>(
    transport: &dyn StatusTransport,
    topic: &str,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    on_error: F,
) -> Option<Box<dyn TransportSession>>
where
    F: Fn(ChannelError),
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(topic, "Subscription attempt cancelled");
                return None;
            }
            result = transport.open(topic) => {
                match result {
                    Ok(session) => {
                        if attempt > 1 {
                            tracing::info!(topic, attempt, "Reconnected to status topic");
                        }
                        return Some(session);
                    }
                    Err(e) => {
                        tracing::warn!(
                            topic,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Status subscription attempt failed",
                        );
                        on_error(e);
                    }
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
