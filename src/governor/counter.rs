use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::clock::Clock;

/// A point-in-time reading of a counter's throughput.
///
/// `ms_per_item` is `NaN` until at least one item has completed; callers that
/// compare snapshots must treat the zero-count case separately.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateSnapshot {
    /// Completions observed so far.
    pub count: usize,
    /// Elapsed milliseconds per completion, rounded to a whole millisecond.
    pub ms_per_item: f64,
}

impl RateSnapshot {
    pub(super) fn empty() -> Self {
        Self {
            count: 0,
            ms_per_item: f64::NAN,
        }
    }
}

/// Pending/complete totals of a counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTotals {
    pub total: usize,
    pub complete: usize,
    pub in_progress: usize,
}

/// Tracks how many items have been registered and retired on one stream, and
/// derives a live rate from its own start time.
///
/// Each measurement batch owns exactly one counter; the governor additionally
/// keeps one long-lived counter for overall progress. Instances are never
/// shared between batches.
pub struct StreamCounter {
    clock: Arc<dyn Clock>,
    started_at: Instant,
    total: usize,
    complete: usize,
}

impl StreamCounter {
    /// Starts a counter; the rate is measured from this moment.
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            started_at,
            total: 0,
            complete: 0,
        }
    }

    /// Registers one more pending item.
    pub fn new_item(&mut self) {
        self.total += 1;
    }

    /// Retires one pending item.
    pub fn item_complete(&mut self) {
        debug_assert!(
            self.complete < self.total,
            "more completions than registered items"
        );
        self.complete += 1;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn complete(&self) -> usize {
        self.complete
    }

    pub fn in_progress(&self) -> usize {
        self.total - self.complete
    }

    pub fn totals(&self) -> StreamTotals {
        StreamTotals {
            total: self.total,
            complete: self.complete,
            in_progress: self.in_progress(),
        }
    }

    /// Elapsed-time-per-completion since the counter started. `ms_per_item`
    /// is `NaN` while nothing has completed.
    pub fn rate(&self) -> RateSnapshot {
        if self.complete == 0 {
            return RateSnapshot::empty();
        }

        let elapsed = self.clock.now() - self.started_at;
        RateSnapshot {
            count: self.complete,
            ms_per_item: (elapsed.as_millis() as f64 / self.complete as f64).round(),
        }
    }
}
