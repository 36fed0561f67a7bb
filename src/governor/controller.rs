use std::sync::Arc;

use snafu::{Snafu, ensure};

use super::clock::Clock;
use super::counter::{RateSnapshot, StreamCounter, StreamTotals};
use super::internal_event;
use super::source::DemandSource;

/// Completions measured per batch, per unit of concurrency. Batches of
/// `concurrency × 10` amortize per-item latency noise before any concurrency
/// change is made.
const BATCH_LENGTH_FACTOR: usize = 10;

/// Invariant violations in the settle protocol. These indicate a bug in the
/// caller's bookkeeping, not a recoverable runtime condition.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GovernorError {
    /// An item was settled that was never requested.
    #[snafu(display(
        "govern_rate called with no measurement batch active; \
         an item was settled that was never requested"
    ))]
    SettleWithoutBatch,

    /// More settle calls than delivered items.
    #[snafu(display("govern_rate called more times than items were delivered"))]
    SettleWithoutDelivery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SearchDirection {
    Increasing,
    Decreasing,
}

impl SearchDirection {
    fn flipped(self) -> Self {
        match self {
            Self::Increasing => Self::Decreasing,
            Self::Decreasing => Self::Increasing,
        }
    }
}

/// One measurement round at a fixed concurrency level. The target length is
/// fixed at creation; the batch owns its counter and is never reused.
struct Batch {
    target_len: usize,
    counter: StreamCounter,
}

impl Batch {
    fn begin(concurrency: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            target_len: concurrency * BATCH_LENGTH_FACTOR,
            counter: StreamCounter::start(clock),
        }
    }
}

/// The governor's decision state machine: demand accounting, the active
/// measurement batch, and the hill-climb over batch latencies.
///
/// All methods are synchronous and never block; the owning handle serializes
/// access behind a mutex. Items produced by [`note_available`] and [`settle`]
/// are the admitted deliveries, in source order, for the caller to forward
/// downstream.
///
/// [`note_available`]: Controller::note_available
/// [`settle`]: Controller::settle
pub(super) struct Controller<S: DemandSource> {
    source: S,
    clock: Arc<dyn Clock>,
    /// Items announced by the source but not yet requested downstream.
    available: usize,
    concurrency: usize,
    direction: SearchDirection,
    /// Rate of the most recently finalized batch. Cleared whenever a batch is
    /// retired incomplete, so a full-length batch is never compared against a
    /// truncated one.
    baseline: Option<RateSnapshot>,
    batch: Option<Batch>,
    /// Long-lived totals across all batches.
    overall: StreamCounter,
}

impl<S: DemandSource> Controller<S> {
    pub(super) fn new(source: S, clock: Arc<dyn Clock>) -> Self {
        let overall = StreamCounter::start(Arc::clone(&clock));
        Self {
            source,
            clock,
            available: 0,
            concurrency: 1,
            direction: SearchDirection::Increasing,
            baseline: None,
            batch: None,
            overall,
        }
    }

    /// One item has been announced by the source. Returns any items admitted
    /// as a consequence.
    pub(super) fn note_available(&mut self) -> Vec<S::Item> {
        self.available += 1;
        self.overall.new_item();
        self.poll_admission()
    }

    /// One delivered item has settled (success or failure alike). Retires it
    /// from the active batch and re-runs admission.
    pub(super) fn settle(&mut self) -> Result<Vec<S::Item>, GovernorError> {
        let batch = self.batch.as_mut().ok_or(GovernorError::SettleWithoutBatch)?;
        ensure!(batch.counter.in_progress() > 0, SettleWithoutDeliverySnafu);

        batch.counter.item_complete();
        self.overall.item_complete();
        internal_event::emit_in_flight(self.in_flight());

        Ok(self.poll_admission())
    }

    /// The admission/completion step. Requests as many items as fit under the
    /// concurrency cap and the batch's remaining target; finalizes the batch
    /// once its target is met and drained; retires it unmeasured if the
    /// source ran dry first.
    fn poll_admission(&mut self) -> Vec<S::Item> {
        let mut admitted = Vec::new();

        loop {
            if self.batch.is_none() {
                if self.available == 0 && self.in_flight() == 0 {
                    break;
                }
                self.batch = Some(Batch::begin(self.concurrency, Arc::clone(&self.clock)));
            }

            let in_flight = self.in_flight();
            let (target_len, completed) = {
                let batch = self.batch.as_ref().expect("admission with no active batch");
                (batch.target_len, batch.counter.complete())
            };

            let admissible = self.concurrency.saturating_sub(in_flight);
            let remaining = target_len.saturating_sub(completed + in_flight);
            let requestable = admissible.min(remaining).min(self.available);

            if requestable > 0 {
                let items = self.source.request(requestable);
                debug_assert_eq!(
                    items.len(),
                    requestable,
                    "source delivered a different count than requested"
                );

                self.available -= items.len();
                let batch = self.batch.as_mut().expect("admission with no active batch");
                for _ in &items {
                    batch.counter.new_item();
                }
                internal_event::emit_in_flight(self.in_flight());
                admitted.extend(items);
                break;
            }

            if completed >= target_len && in_flight == 0 {
                self.finalize_batch();
                if self.available > 0 {
                    // A fresh burst at the new concurrency level, without
                    // waiting for another external trigger.
                    continue;
                }
                break;
            }

            if self.available == 0 && in_flight == 0 && completed < target_len {
                self.retire_incomplete(completed, target_len);
                break;
            }

            break;
        }

        admitted
    }

    /// Hill-climb step on a fully measured batch. The tie-break is
    /// asymmetric: while increasing, a batch that is merely no faster flips
    /// the direction; while decreasing, only a strictly slower batch flips
    /// it. This keeps two equally-performing levels from oscillating forever.
    fn finalize_batch(&mut self) {
        let batch = self.batch.take().expect("finalizing with no active batch");
        let measured = batch.counter.rate();

        if let Some(baseline) = self.baseline {
            let flip = match self.direction {
                SearchDirection::Increasing => baseline.ms_per_item <= measured.ms_per_item,
                SearchDirection::Decreasing => baseline.ms_per_item < measured.ms_per_item,
            };
            if flip {
                self.direction = self.direction.flipped();
            }
        }

        // The floor does not flip the direction by itself; only a
        // non-improving comparison above does.
        self.concurrency = match self.direction {
            SearchDirection::Increasing => self.concurrency + 1,
            SearchDirection::Decreasing => self.concurrency.saturating_sub(1).max(1),
        };

        self.baseline = Some(measured);
        internal_event::emit_concurrency_adjusted(self.concurrency, measured);
    }

    /// The source ran dry before the batch reached its target. Discard the
    /// measurement and the baseline; concurrency and direction are untouched
    /// and admission resumes on the next availability notice.
    fn retire_incomplete(&mut self, completed: usize, target_len: usize) {
        self.baseline = None;
        self.batch = None;
        internal_event::emit_batch_discarded(completed, target_len);
    }

    fn in_flight(&self) -> usize {
        self.batch
            .as_ref()
            .map_or(0, |batch| batch.counter.in_progress())
    }

    /// Rate of the active batch once it has a completion, else the baseline,
    /// else an empty snapshot.
    pub(super) fn rate(&self) -> RateSnapshot {
        if let Some(batch) = &self.batch {
            if batch.counter.complete() > 0 {
                return batch.counter.rate();
            }
        }
        self.baseline.unwrap_or_else(RateSnapshot::empty)
    }

    pub(super) fn in_progress(&self) -> usize {
        self.in_flight()
    }

    pub(super) fn concurrency_level(&self) -> usize {
        self.concurrency
    }

    pub(super) fn available(&self) -> usize {
        self.available
    }

    pub(super) fn totals(&self) -> StreamTotals {
        self.overall.totals()
    }

    pub(super) fn overall_rate(&self) -> RateSnapshot {
        self.overall.rate()
    }

    pub(super) fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
