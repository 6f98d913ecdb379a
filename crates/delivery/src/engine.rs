//! Notification engine — the public entry point composing admission control,
//! the batch window scheduler and the sender.

use crate::admission::AdmissionController;
use crate::sender::{deliver, NotificationSender};
use crate::window::BatchScheduler;
use notify_core::config::{AdmissionConfig, BatchConfig};
use notify_core::{
    Admission, CancellationToken, EngineState, GatewayResult, NotificationRequest,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Decides per request between immediate dispatch and batching, and owns
/// the lifecycle of the batch window timer.
///
/// `send` never panics across the boundary and never raises: every outcome
/// is a [`GatewayResult`]. Safe to share as `Arc<NotificationEngine>` across
/// any number of concurrent callers.
pub struct NotificationEngine {
    admission: AdmissionController,
    scheduler: Arc<BatchScheduler>,
    sender: Arc<dyn NotificationSender>,
    disposed: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationEngine {
    /// Validate configuration and start the batch window timer. Must be
    /// called from within a Tokio runtime.
    ///
    /// `shutdown` is the host's shutdown signal; it aborts in-flight batch
    /// flushes but does not dispose the engine.
    pub fn start(
        admission: AdmissionConfig,
        batching: BatchConfig,
        sender: Arc<dyn NotificationSender>,
        shutdown: CancellationToken,
    ) -> GatewayResult<Self> {
        admission.validate()?;
        batching.validate()?;

        info!(
            immediate_window_ms = admission.immediate_window_ms,
            max_immediate_calls = admission.max_immediate_calls,
            retention_period_ms = batching.retention_period_ms,
            max_batched_items = batching.max_batched_items,
            sender = sender.name(),
            "Notification engine starting"
        );

        let scheduler = Arc::new(BatchScheduler::new(batching, sender.clone(), shutdown));
        let ticker = scheduler.spawn_ticker();

        Ok(Self {
            admission: AdmissionController::new(&admission),
            scheduler,
            sender,
            disposed: AtomicBool::new(false),
            ticker: Mutex::new(Some(ticker)),
        })
    }

    pub fn state(&self) -> EngineState {
        if self.disposed.load(Ordering::Acquire) {
            EngineState::Disposed
        } else {
            EngineState::Active
        }
    }

    /// Submit a notification.
    ///
    /// * Disposed engine → `Ok(false)`, nothing sent.
    /// * Immediate → the sender's own outcome.
    /// * Batched → `Ok(true)` once the request has joined the current
    ///   window; the eventual flush outcome is only logged.
    ///
    /// `cancel` covers classification and, for immediate requests, the
    /// downstream send. It has no effect once a request is batched.
    pub async fn send(
        &self,
        subject: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<bool> {
        if self.state() == EngineState::Disposed {
            metrics::counter!("gateway.rejected.disposed").increment(1);
            warn!("Operation cannot commence as the service is disposed.");
            return Ok(false);
        }

        let result = self.dispatch(subject, body, cancel).await;
        if let Err(e) = &result {
            metrics::counter!("gateway.send.errors").increment(1);
            error!(error = %e, subject = %subject, "Failed to send notification");
        }
        result
    }

    async fn dispatch(
        &self,
        subject: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<bool> {
        let request = NotificationRequest::new(subject, body);

        match self.admission.classify(Instant::now(), cancel)? {
            Admission::Immediate => {
                metrics::counter!("gateway.dispatch.immediate").increment(1);
                debug!(subject = %subject, "Dispatching notification immediately");
                deliver(
                    self.sender.as_ref(),
                    request.timestamp,
                    &request.subject,
                    &request.body,
                    cancel,
                )
                .await
            }
            Admission::Batched => {
                // A cancellation between classification and enqueue keeps the
                // request out of the batch.
                cancel.check()?;
                metrics::counter!("gateway.dispatch.batched").increment(1);
                debug!(subject = %subject, "Notification added to current batch window");
                self.scheduler.enqueue(request);
                Ok(true)
            }
        }
    }

    /// Stop the window timer and release admission and batch state. Pending
    /// requests are discarded, not flushed. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        self.admission.clear();
        let discarded = self.scheduler.discard_pending();

        info!(discarded = discarded, "Notification engine disposed");
    }

    /// Requests waiting in the current batch window.
    pub fn pending_len(&self) -> usize {
        self.scheduler.pending_len()
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
