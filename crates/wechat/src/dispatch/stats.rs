//! Rolling processing statistics for the status endpoint.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::wechat::MessageKind;

/// Number of outcomes kept.
pub const WINDOW: usize = 200;

/// How many of the newest outcomes the snapshot lists.
const RECENT: usize = 10;

/// One finished dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedMessage {
    pub kind: &'static str,
    pub success: bool,
    /// Finished after the reply budget ran out
    pub deferred: bool,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Aggregated view over the window.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total: usize,
    pub succeeded: usize,
    /// Fraction of successful outcomes, `1.0` when nothing was processed
    pub success_rate: f64,
    pub recent_messages: Vec<ProcessedMessage>,
}

/// Fixed-size ring of recent outcomes, shared between request handlers and
/// late completions.
#[derive(Debug, Clone, Default)]
pub struct ProcessingStats {
    records: Arc<Mutex<VecDeque<ProcessedMessage>>>,
}

impl ProcessingStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: MessageKind, success: bool, deferred: bool, elapsed: Duration) {
        let entry = ProcessedMessage {
            kind: kind.as_str(),
            success,
            deferred,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            finished_at: Utc::now(),
        };

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == WINDOW {
            records.pop_front();
        }
        records.push_back(entry);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let total = records.len();
        let succeeded = records.iter().filter(|r| r.success).count();

        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total == 0 {
            1.0
        } else {
            succeeded as f64 / total as f64
        };

        StatsSnapshot {
            total,
            succeeded,
            success_rate,
            recent_messages: records.iter().rev().take(RECENT).cloned().collect(),
        }
    }
}
