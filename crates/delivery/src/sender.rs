//! Delivery mechanisms. The engine only sees [`NotificationSender`]; which
//! concrete sender backs it is chosen from configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_core::config::{SenderConfig, SenderKind};
use notify_core::types::format_timestamp;
use notify_core::{CancellationToken, GatewayError, GatewayResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Delivers one `(timestamp, subject, body)` triple.
///
/// `Ok(true)` means delivered, `Ok(false)` means the sender reported a
/// failure, `Err` means delivery raised an error. Callers make exactly one
/// attempt; retries belong inside the implementation if anywhere.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        timestamp: DateTime<Utc>,
        subject: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<bool>;

    fn name(&self) -> &str;
}

/// Build the sender selected in configuration.
pub fn build_sender(config: &SenderConfig) -> Arc<dyn NotificationSender> {
    match config.kind {
        SenderKind::Console => Arc::new(ConsoleSender::new()),
        SenderKind::Log => Arc::new(LogSender),
    }
}

/// Writes notifications to stdout.
pub struct ConsoleSender {
    stdout: tokio::sync::Mutex<tokio::io::Stdout>,
}

impl ConsoleSender {
    pub fn new() -> Self {
        info!("Console sender initialized");
        Self {
            stdout: tokio::sync::Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for ConsoleSender {
    async fn send(
        &self,
        timestamp: DateTime<Utc>,
        subject: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<bool> {
        cancel.check()?;

        let rendered = format!("[{}] {}\n{}\n", format_timestamp(&timestamp), subject, body);

        // Hold the lock across both writes so concurrent notifications
        // don't interleave on the terminal.
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(rendered.as_bytes()).await?;
        stdout.flush().await?;

        debug!(subject = %subject, bytes = rendered.len(), "Notification written to console");
        Ok(true)
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Emits notifications as structured `info` events.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(
        &self,
        timestamp: DateTime<Utc>,
        subject: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<bool> {
        cancel.check()?;
        info!(
            target: "notifications",
            timestamp = %format_timestamp(&timestamp),
            subject = %subject,
            body = %body,
            "Notification delivered"
        );
        Ok(true)
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Make one delivery attempt, racing `cancel`. A cancellation observed
/// before or during the send wins over whatever the sender would answer.
pub(crate) async fn deliver(
    sender: &dyn NotificationSender,
    timestamp: DateTime<Utc>,
    subject: &str,
    body: &str,
    cancel: &CancellationToken,
) -> GatewayResult<bool> {
    cancel.check()?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        outcome = sender.send(timestamp, subject, body, cancel) => outcome,
    }
}

/// A call recorded by [`CaptureSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub body: String,
}

/// How a [`CaptureSender`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Succeed,
    ReportFailure,
    RaiseError,
}

/// In-memory sender that records every call. Used by tests.
pub struct CaptureSender {
    sent: Mutex<Vec<SentNotification>>,
    outcome: Mutex<CaptureOutcome>,
    delay: Option<Duration>,
}

impl CaptureSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            outcome: Mutex::new(CaptureOutcome::Succeed),
            delay: None,
        }
    }

    /// Sleep for `delay` before answering; the sleep races cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_outcome(&self, outcome: CaptureOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Default for CaptureSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for CaptureSender {
    async fn send(
        &self,
        timestamp: DateTime<Utc>,
        subject: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<bool> {
        cancel.check()?;
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.sent.lock().push(SentNotification {
            timestamp,
            subject: subject.to_string(),
            body: body.to_string(),
        });

        let outcome = *self.outcome.lock();
        match outcome {
            CaptureOutcome::Succeed => Ok(true),
            CaptureOutcome::ReportFailure => Ok(false),
            CaptureOutcome::RaiseError => {
                Err(GatewayError::Delivery(format!("capture sender rejected '{}'", subject)))
            }
        }
    }

    fn name(&self) -> &str {
        "capture"
    }
}
