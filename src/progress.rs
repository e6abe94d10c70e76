//! Transfer progress reporting and cooperative cancellation.

use std::cell::Cell;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Snapshot of libgit2 indexer progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub total_objects: usize,
    pub indexed_objects: usize,
    pub received_objects: usize,
    pub local_objects: usize,
    pub total_deltas: usize,
    pub indexed_deltas: usize,
    pub received_bytes: usize,
}

impl TransferStats {
    /// Fraction of objects indexed, in `0.0..=1.0`. Zero until the total is known.
    pub fn fraction(&self) -> f64 {
        if self.total_objects == 0 {
            0.0
        } else {
            (self.indexed_objects as f64 / self.total_objects as f64).min(1.0)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_objects > 0
            && self.indexed_objects == self.total_objects
            && self.indexed_deltas == self.total_deltas
    }
}

impl From<git2::Progress<'_>> for TransferStats {
    fn from(progress: git2::Progress<'_>) -> Self {
        Self {
            total_objects: progress.total_objects(),
            indexed_objects: progress.indexed_objects(),
            received_objects: progress.received_objects(),
            local_objects: progress.local_objects(),
            total_deltas: progress.total_deltas(),
            indexed_deltas: progress.indexed_deltas(),
            received_bytes: progress.received_bytes(),
        }
    }
}

/// What a progress callback wants the transfer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Continue,
    Cancel,
}

/// Why a transfer was stopped before libgit2 finished it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    Cancelled,
    TimedOut(Duration),
}

/// Drives a caller's progress callback and enforces the transfer deadline.
///
/// libgit2 only learns "stop" as `false` from a callback, so the reason is
/// recorded here and read back once the operation has failed.
pub(crate) struct TransferMonitor<'a, C, F> {
    payload: &'a mut C,
    on_progress: F,
    started: Instant,
    timeout: Option<Duration>,
    stopped: &'a Cell<Option<StopReason>>,
}

impl<'a, C, F> TransferMonitor<'a, C, F>
where
    F: FnMut(&TransferStats, &mut C) -> ProgressAction,
{
    pub(crate) fn new(
        payload: &'a mut C,
        on_progress: F,
        timeout: Option<Duration>,
        stopped: &'a Cell<Option<StopReason>>,
    ) -> Self {
        Self {
            payload,
            on_progress,
            started: Instant::now(),
            timeout,
            stopped,
        }
    }

    /// Handle an indexer progress tick. Returns `false` to abort.
    pub(crate) fn on_transfer(&mut self, stats: &TransferStats) -> bool {
        if !self.check_deadline() {
            return false;
        }
        match (self.on_progress)(stats, self.payload) {
            ProgressAction::Continue => true,
            ProgressAction::Cancel => {
                self.stopped.set(Some(StopReason::Cancelled));
                false
            }
        }
    }

    /// Handle a sideband message or other non-indexer tick.
    pub(crate) fn on_tick(&self) -> bool {
        self.check_deadline()
    }

    fn check_deadline(&self) -> bool {
        if self.stopped.get().is_some() {
            return false;
        }
        if let Some(timeout) = self.timeout {
            if self.started.elapsed() >= timeout {
                self.stopped.set(Some(StopReason::TimedOut(timeout)));
                return false;
            }
        }
        true
    }
}
