//! Fixed-delay backstop that keeps a run moving when the push channel is
//! silent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default delay before the fallback fires.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(5000);

/// A one-shot timer. Dropping it cancels a pending firing.
pub struct FallbackTimer {
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl FallbackTimer {
    /// Schedule `action` to run once after `delay`.
    pub fn start<F>(delay: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let deadline = tokio::time::Instant::now() + delay;

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            let fired = Arc::clone(&fired);
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        fired.store(true, Ordering::Release);
                        tracing::debug!(delay_ms = delay.as_millis() as u64, "Fallback timer fired");
                        action();
                    }
                }
            }
        });

        Self {
            cancel,
            fired,
            handle,
        }
    }

    /// Prevent a pending firing. No-op once the timer has fired.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// `true` until the timer fires or is cancelled.
    pub fn is_pending(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for FallbackTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
