//! Rolling-window admission check deciding whether a request may
//! bypass batching.

use notify_core::config::AdmissionConfig;
use notify_core::{Admission, CancellationToken, GatewayResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Classifies requests as immediate or batched from a rolling log of
/// recent arrival instants.
///
/// Up to `max_immediate_calls` requests pass straight through per
/// `immediate_window`. The log is only trimmed when a request arrives, so
/// a lull longer than the window makes the next request immediate again.
pub struct AdmissionController {
    window: Duration,
    max_immediate_calls: usize,
    /// Arrival instants, oldest first.
    calls: Mutex<VecDeque<Instant>>,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            window: config.immediate_window(),
            max_immediate_calls: config.max_immediate_calls as usize,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a request arriving at `now` and classify it.
    ///
    /// Append, trim and length read happen under one lock, so concurrent
    /// callers each see a log that includes their own entry and every
    /// entry recorded before it.
    pub fn classify(&self, now: Instant, cancel: &CancellationToken) -> GatewayResult<Admission> {
        cancel.check()?;

        let mut calls = self.calls.lock();
        calls.push_back(now);

        while let Some(oldest) = calls.front().copied() {
            if now.saturating_duration_since(oldest) <= self.window {
                break;
            }
            // The log is consistent between pops.
            cancel.check()?;
            calls.pop_front();
        }

        if calls.len() <= self.max_immediate_calls {
            Ok(Admission::Immediate)
        } else {
            Ok(Admission::Batched)
        }
    }

    /// Entries currently held in the rolling log.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}
