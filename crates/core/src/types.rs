use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single notification as submitted by a caller. Created when `send` is
/// invoked and consumed exactly once, by either the immediate path or a
/// batch flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub body: String,
}

impl NotificationRequest {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self::at(Utc::now(), subject, body)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Render this request as one block of an aggregate body:
    /// `[<timestamp>] <subject>\n<body>`.
    pub fn format_block(&self) -> String {
        format!(
            "[{}] {}\n{}",
            format_timestamp(&self.timestamp),
            self.subject,
            self.body
        )
    }
}

/// RFC 3339, millisecond precision, `Z` suffix.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Outcome of the rolling-window admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    /// Dispatch within the originating call.
    Immediate,
    /// Fold into the current batch window.
    Batched,
}

/// Lifecycle of a notification engine. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Active,
    Disposed,
}

/// The one sender call produced by a batch flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    /// Items whose content made it into `body`.
    pub items_included: usize,
    /// Items handed to the flush.
    pub items_total: usize,
}

impl OutboundMessage {
    pub fn items_dropped(&self) -> usize {
        self.items_total - self.items_included
    }
}
