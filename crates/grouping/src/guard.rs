//! Single-fire latch for the "task complete" transition.
//!
//! The push channel and the fallback timer both try to complete the same
//! run. Both go through one [`CompletionGuard`]; whichever arrives first
//! runs the action, the other is ignored.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct CompletionGuard {
    fired: AtomicBool,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` if this is the first call; otherwise do nothing.
    ///
    /// Returns `true` when `action` ran. Safe to call concurrently from
    /// any number of threads or tasks.
    pub fn fire_once<F: FnOnce()>(&self, action: F) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            action();
            true
        } else {
            false
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
