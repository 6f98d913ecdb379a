//! Batch window scheduler — buffers batched requests and flushes them as one
//! aggregate notification every retention period.
//!
//! Only the hand-off of the pending batch is atomic. Flushes run as
//! detached tasks, so under a slow sender several may be in flight at once
//! and finish out of window order.

use crate::sender::{deliver, NotificationSender};
use notify_core::config::BatchConfig;
use notify_core::{CancellationToken, GatewayError, GatewayResult, NotificationRequest, OutboundMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Owns the pending batch for the current window.
pub struct BatchScheduler {
    config: Arc<BatchConfig>,
    sender: Arc<dyn NotificationSender>,
    /// Host shutdown signal; aborts in-flight flushes.
    shutdown: CancellationToken,
    pending: Mutex<Vec<NotificationRequest>>,
}

impl BatchScheduler {
    pub fn new(
        config: BatchConfig,
        sender: Arc<dyn NotificationSender>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sender,
            shutdown,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Append a request to the current window. Never blocks beyond the
    /// hand-off critical section.
    pub fn enqueue(&self, request: NotificationRequest) {
        self.pending.lock().push(request);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop the pending batch without flushing it. Returns how many
    /// requests were discarded.
    pub fn discard_pending(&self) -> usize {
        let discarded = std::mem::take(&mut *self.pending.lock());
        discarded.len()
    }

    /// Close the current window: swap the pending batch for an empty one and
    /// flush the swapped-out batch on its own task. Empty windows are a
    /// no-op and return `None`.
    pub fn on_window_elapsed(&self) -> Option<JoinHandle<()>> {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return None;
        }

        let flush = BatchFlush {
            batch_id: Uuid::new_v4(),
            config: self.config.clone(),
            sender: self.sender.clone(),
            shutdown: self.shutdown.clone(),
        };
        Some(tokio::spawn(flush.run(batch)))
    }

    /// Start the window timer. The first window closes one retention
    /// period from now.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let period = self.config.retention_period();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                // Flush handles are detached; the next window opens regardless.
                let _ = scheduler.on_window_elapsed();
            }
        })
    }
}

/// One window's flush, detached from the scheduler.
struct BatchFlush {
    batch_id: Uuid,
    config: Arc<BatchConfig>,
    sender: Arc<dyn NotificationSender>,
    shutdown: CancellationToken,
}

impl BatchFlush {
    async fn run(self, batch: Vec<NotificationRequest>) {
        let total = batch.len();
        debug!(batch_id = %self.batch_id, count = total, "Flushing notification batch");

        let message = match compose_outbound(self.batch_id, batch, &self.config, &self.shutdown) {
            Ok(message) => message,
            Err(e) => {
                self.report_error(&e, total);
                return;
            }
        };

        let outcome = deliver(
            self.sender.as_ref(),
            message.timestamp,
            &message.subject,
            &message.body,
            &self.shutdown,
        )
        .await;

        match outcome {
            Ok(true) => {
                metrics::counter!("gateway.flush.sent").increment(1);
                info!(
                    batch_id = %self.batch_id,
                    sender = self.sender.name(),
                    included = message.items_included,
                    total = message.items_total,
                    "Notification batch flushed"
                );
            }
            Ok(false) => {
                metrics::counter!("gateway.flush.failed").increment(1);
                error!(
                    batch_id = %self.batch_id,
                    sender = self.sender.name(),
                    total = message.items_total,
                    "Sender reported failure for notification batch"
                );
            }
            Err(e) => self.report_error(&e, total),
        }
    }

    fn report_error(&self, e: &GatewayError, total: usize) {
        if e.is_cancelled() {
            metrics::counter!("gateway.flush.cancelled").increment(1);
            warn!(
                batch_id = %self.batch_id,
                count = total,
                "Notification batch flush aborted by shutdown; items dropped"
            );
        } else {
            metrics::counter!("gateway.flush.failed").increment(1);
            error!(
                batch_id = %self.batch_id,
                sender = self.sender.name(),
                count = total,
                error = %e,
                "Failed to flush notification batch"
            );
        }
    }
}

/// Turn one window's batch into the single outbound call it produces.
///
/// A lone item passes through untouched. Larger batches become a
/// `"<N> Notifications Received"` aggregate of formatted blocks joined by
/// the configured separator. Once a window holds `max_batched_items` or
/// more, only the first `max_batched_items` blocks are kept and a trailing
/// note block reports how many were dropped (possibly zero). `shutdown` is
/// checked before every block is appended.
pub fn compose_outbound(
    batch_id: Uuid,
    mut batch: Vec<NotificationRequest>,
    config: &BatchConfig,
    shutdown: &CancellationToken,
) -> GatewayResult<OutboundMessage> {
    let total = batch.len();
    let Some(first) = batch.first() else {
        return Err(GatewayError::Internal(anyhow::anyhow!(
            "cannot compose an empty batch"
        )));
    };
    let timestamp = first.timestamp;

    if total == 1 {
        shutdown.check()?;
        let item = batch.remove(0);
        return Ok(OutboundMessage {
            timestamp: item.timestamp,
            subject: item.subject,
            body: item.body,
            items_included: 1,
            items_total: 1,
        });
    }

    let limit = config.max_batched_items;
    let truncated = limit > 0 && total >= limit;
    let included = if truncated { limit } else { total };

    let mut blocks = Vec::with_capacity(included + 1);
    for item in &batch[..included] {
        shutdown.check()?;
        blocks.push(item.format_block());
    }

    if truncated {
        let dropped = total - included;
        metrics::counter!("gateway.flush.truncated").increment(1);
        metrics::counter!("gateway.flush.dropped_items").increment(dropped as u64);
        warn!(
            batch_id = %batch_id,
            processed = included,
            total = total,
            "{} out of {} will be processed",
            included,
            total
        );
        for item in &batch[included..] {
            info!(
                batch_id = %batch_id,
                timestamp = %item.timestamp,
                subject = %item.subject,
                body = %item.body,
                "Notification dropped from truncated batch"
            );
        }
        blocks.push(format!(
            "{} of {} notifications were included in this batch; {} were dropped. \
             See the gateway logs (batch {}) for the full set.",
            included, total, dropped, batch_id
        ));
    }

    Ok(OutboundMessage {
        timestamp,
        subject: format!("{} Notifications Received", total),
        body: blocks.join(config.item_separator.as_str()),
        items_included: included,
        items_total: total,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::log_capture::CaptureWriter;
    use crate::sender::{CaptureOutcome, CaptureSender};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn batch_config(separator: &str, max_items: usize) -> BatchConfig {
        BatchConfig {
            retention_period_ms: 500,
            item_separator: separator.to_string(),
            max_batched_items: max_items,
        }
    }

    fn requests(bodies: &[&str]) -> Vec<NotificationRequest> {
        let start = Utc::now();
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                NotificationRequest::at(
                    start + ChronoDuration::milliseconds(i as i64),
                    format!("subject-{i}"),
                    *body,
                )
            })
            .collect()
    }

    #[test]
    fn test_single_item_passes_through() {
        let batch = requests(&["only"]);
        let expected = batch[0].clone();

        let msg = compose_outbound(
            Uuid::new_v4(),
            batch,
            &batch_config("---", 10),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(msg.subject, expected.subject);
        assert_eq!(msg.body, expected.body);
        assert_eq!(msg.timestamp, expected.timestamp);
        assert_eq!(msg.items_total, 1);
    }

    #[test]
    fn test_aggregate_keeps_arrival_order() {
        let batch = requests(&["b", "c", "d"]);
        let first_ts = batch[0].timestamp;
        let blocks: Vec<String> = batch.iter().map(|r| r.format_block()).collect();

        let msg = compose_outbound(
            Uuid::new_v4(),
            batch,
            &batch_config("---", 0),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(msg.subject, "3 Notifications Received");
        assert_eq!(msg.timestamp, first_ts);
        let segments: Vec<&str> = msg.body.split("---").collect();
        assert_eq!(segments, blocks.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(segments[0].ends_with("\nb"));
        assert!(segments[2].ends_with("\nd"));
    }

    #[test]
    fn test_truncation_appends_note() {
        let bodies: Vec<String> = (0..7).map(|i| format!("body-{i}")).collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();

        let msg = compose_outbound(
            Uuid::new_v4(),
            requests(&refs),
            &batch_config("|", 4),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(msg.subject, "7 Notifications Received");
        assert_eq!(msg.items_included, 4);
        assert_eq!(msg.items_dropped(), 3);

        let segments: Vec<&str> = msg.body.split('|').collect();
        assert_eq!(segments.len(), 5);
        for (i, segment) in segments[..4].iter().enumerate() {
            assert!(segment.contains(&format!("body-{i}")));
        }
        let note = segments[4];
        assert!(note.contains("4 of 7"));
        assert!(note.contains("3 were dropped"));
        assert!(!msg.body.contains("body-4"));
    }

    #[test]
    fn test_batch_at_limit_gets_note() {
        let msg = compose_outbound(
            Uuid::new_v4(),
            requests(&["a", "b", "c"]),
            &batch_config("|", 3),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(msg.subject, "3 Notifications Received");
        assert_eq!(msg.items_included, 3);
        assert_eq!(msg.items_dropped(), 0);

        let segments: Vec<&str> = msg.body.split('|').collect();
        assert_eq!(segments.len(), 4);
        assert!(segments[2].ends_with("\nc"));
        assert!(segments[3].contains("3 of 3"));
        assert!(segments[3].contains("0 were dropped"));
    }

    #[test]
    fn test_batch_below_limit_has_no_note() {
        let msg = compose_outbound(
            Uuid::new_v4(),
            requests(&["a", "b"]),
            &batch_config("|", 3),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(msg.items_included, 2);
        assert_eq!(msg.body.split('|').count(), 2);
        assert!(!msg.body.contains("were dropped"));
    }

    #[test]
    fn test_truncation_logs_counts_and_dropped_items() {
        let (logs, _guard) = CaptureWriter::install();
        let bodies: Vec<String> = (0..6).map(|i| format!("body-{i}")).collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();

        compose_outbound(
            Uuid::new_v4(),
            requests(&refs),
            &batch_config("|", 4),
            &CancellationToken::new(),
        )
        .unwrap();

        let output = logs.output();
        let warning = output
            .lines()
            .find(|line| line.contains("4 out of 6 will be processed"))
            .unwrap();
        assert!(warning.contains("WARN"));
        assert!(warning.contains("processed=4"));
        assert!(warning.contains("total=6"));

        let dropped: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("Notification dropped from truncated batch"))
            .collect();
        assert_eq!(dropped.len(), 2);
        assert!(dropped[0].contains("body-4"));
        assert!(dropped[1].contains("body-5"));
    }

    #[test]
    fn test_batch_at_limit_logs_warning() {
        let (logs, _guard) = CaptureWriter::install();

        compose_outbound(
            Uuid::new_v4(),
            requests(&["a", "b", "c"]),
            &batch_config("|", 3),
            &CancellationToken::new(),
        )
        .unwrap();

        let output = logs.output();
        assert!(output.contains("3 out of 3 will be processed"));
        assert!(!output.contains("Notification dropped from truncated batch"));
    }

    #[test]
    fn test_shutdown_aborts_composition() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = compose_outbound(
            Uuid::new_v4(),
            requests(&["a", "b"]),
            &batch_config("|", 0),
            &shutdown,
        );
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_window_is_noop() {
        let sender = Arc::new(CaptureSender::new());
        let scheduler = BatchScheduler::new(
            batch_config("---", 0),
            sender.clone(),
            CancellationToken::new(),
        );

        assert!(scheduler.on_window_elapsed().is_none());
        assert_eq!(sender.count(), 0);
    }

    #[tokio::test]
    async fn test_window_swap_starts_fresh_batch() {
        let sender = Arc::new(CaptureSender::new());
        let scheduler = BatchScheduler::new(
            batch_config("---", 0),
            sender.clone(),
            CancellationToken::new(),
        );

        for body in ["x", "y"] {
            scheduler.enqueue(NotificationRequest::new("s", body));
        }
        let handle = scheduler.on_window_elapsed().unwrap();
        assert_eq!(scheduler.pending_len(), 0);

        scheduler.enqueue(NotificationRequest::new("s", "z"));
        handle.await.unwrap();
        scheduler.on_window_elapsed().unwrap().await.unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "2 Notifications Received");
        assert_eq!(sent[1].subject, "s");
        assert_eq!(sent[1].body, "z");
    }

    #[tokio::test]
    async fn test_flush_failure_is_contained() {
        let sender = Arc::new(CaptureSender::new());
        sender.set_outcome(CaptureOutcome::RaiseError);
        let scheduler = BatchScheduler::new(
            batch_config("---", 0),
            sender.clone(),
            CancellationToken::new(),
        );

        scheduler.enqueue(NotificationRequest::new("s", "a"));
        scheduler.enqueue(NotificationRequest::new("s", "b"));
        scheduler.on_window_elapsed().unwrap().await.unwrap();

        assert_eq!(sender.count(), 1);
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_failure_is_not_retried() {
        let sender = Arc::new(CaptureSender::new());
        sender.set_outcome(CaptureOutcome::ReportFailure);
        let scheduler = Arc::new(BatchScheduler::new(
            batch_config("---", 0),
            sender.clone(),
            CancellationToken::new(),
        ));
        let ticker = scheduler.spawn_ticker();

        scheduler.enqueue(NotificationRequest::new("s", "a"));
        scheduler.enqueue(NotificationRequest::new("s", "b"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "2 Notifications Received");
        assert_eq!(scheduler.pending_len(), 0);

        // Later windows are empty: the failed batch is gone.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(sender.count(), 1);
        assert!(scheduler.on_window_elapsed().is_none());

        ticker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_in_flight_flush() {
        let sender = Arc::new(CaptureSender::new().with_delay(Duration::from_secs(5)));
        let shutdown = CancellationToken::new();
        let scheduler = BatchScheduler::new(batch_config("---", 0), sender.clone(), shutdown.clone());

        scheduler.enqueue(NotificationRequest::new("s", "a"));
        scheduler.enqueue(NotificationRequest::new("s", "b"));
        let handle = scheduler.on_window_elapsed().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(sender.count(), 0);
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_flushes_each_window() {
        let sender = Arc::new(CaptureSender::new());
        let scheduler = Arc::new(BatchScheduler::new(
            batch_config("---", 0),
            sender.clone(),
            CancellationToken::new(),
        ));
        let ticker = scheduler.spawn_ticker();

        scheduler.enqueue(NotificationRequest::new("s", "first"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sender.count(), 1);

        // Quiet window: nothing flushed.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sender.count(), 1);

        scheduler.enqueue(NotificationRequest::new("s", "second"));
        scheduler.enqueue(NotificationRequest::new("s", "third"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sender.count(), 2);
        assert_eq!(sender.sent()[1].subject, "2 Notifications Received");

        ticker.abort();
    }
}
