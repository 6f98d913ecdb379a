//! Cancellation token shared between callers, the engine and the host.
//!
//! Backed by a `tokio::sync::watch` channel so the flag can be polled
//! synchronously (`is_cancelled`) inside lock-held loops and awaited
//! (`cancelled`) when racing a delivery.

use crate::error::{GatewayError, GatewayResult};
use std::sync::Arc;
use tokio::sync::watch;

/// Clonable, one-shot cancellation flag. All clones observe the same state;
/// once cancelled it stays cancelled.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger cancellation. Subsequent calls are no-ops.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// `Err(Cancelled)` once triggered, `Ok(())` otherwise.
    pub fn check(&self) -> GatewayResult<()> {
        if self.is_cancelled() {
            Err(GatewayError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so `wait_for` only returns
        // once the flag flips.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
