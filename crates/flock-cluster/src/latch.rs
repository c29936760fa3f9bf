//! One-shot broadcast latch.
//!
//! Backs both the readiness gate and the shutdown signal: the latch starts
//! open, fires at most once, never resets, and every waiter (including ones
//! that subscribe after it fired) observes the transition.

use std::sync::Arc;

use tokio::sync::watch;

/// A fire-once, wait-many signal.
///
/// Cloning a `Latch` yields another handle to the same signal.
#[derive(Debug, Clone)]
pub struct Latch {
    tx: Arc<watch::Sender<bool>>,
}

impl Latch {
    /// Create an unfired latch.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the latch.
    ///
    /// Returns `true` if this call fired it, `false` if it had already fired.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Non-blocking check.
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a
        // closed channel before the value turns true.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
