//! Progress reporting for in-flight transfers.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::constants::{DB_UPDATE_INTERVAL, UI_UPDATE_INTERVAL};

/// Byte counters for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes written to the temp file so far, including resumed bytes.
    pub bytes_downloaded: u64,
    /// Expected total, 0 when unknown.
    pub total_bytes: u64,
}

/// Receiver of throttled progress from [`super::ResumableDownloader`].
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Short-interval update for in-memory state and UI.
    async fn report(&self, progress: TransferProgress);

    /// Long-interval update that should be persisted.
    async fn checkpoint(&self, progress: TransferProgress);
}

/// Sink that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _progress: TransferProgress) {}

    async fn checkpoint(&self, _progress: TransferProgress) {}
}

/// Which sink calls are due after a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ThrottleDecision {
    pub report: bool,
    pub checkpoint: bool,
}

/// Tracks the two reporting intervals of a transfer.
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    ui_interval: Duration,
    db_interval: Duration,
    last_report: Instant,
    last_checkpoint: Instant,
}

impl ProgressThrottle {
    pub(crate) fn new(now: Instant) -> Self {
        Self::with_intervals(now, UI_UPDATE_INTERVAL, DB_UPDATE_INTERVAL)
    }

    pub(crate) fn with_intervals(now: Instant, ui_interval: Duration, db_interval: Duration) -> Self {
        Self {
            ui_interval,
            db_interval,
            last_report: now,
            last_checkpoint: now,
        }
    }

    pub(crate) fn tick(&mut self, now: Instant) -> ThrottleDecision {
        let mut decision = ThrottleDecision::default();
        if now.duration_since(self.last_report) > self.ui_interval {
            self.last_report = now;
            decision.report = true;
        }
        if now.duration_since(self.last_checkpoint) > self.db_interval {
            self.last_checkpoint = now;
            decision.checkpoint = true;
        }
        decision
    }
}
