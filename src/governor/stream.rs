use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use pin_project::pin_project;
use tokio::sync::mpsc;

use super::clock::{Clock, WallClock};
use super::controller::{Controller, GovernorError};
use super::counter::{RateSnapshot, StreamTotals};
use super::source::{DemandSource, QueueSource};

/// Handle to a governed stream.
///
/// Created with [`new`](RateGovernor::new) around a [`DemandSource`] (or
/// [`from_queue`](RateGovernor::from_queue) for the built-in queue). The
/// handle is cheap to clone and shared between the producer side, which calls
/// [`item_available`](RateGovernor::item_available) once per announced item,
/// and the consumer side, which calls [`govern_rate`](RateGovernor::govern_rate)
/// once per delivered item after that item's work has settled.
///
/// The governor only withholds further requests; it cannot cancel work it has
/// already delivered. A consumer that skips a settle call permanently leaks
/// one in-flight slot; [`settle_on_drop`](RateGovernor::settle_on_drop)
/// guards against that on early-exit paths.
pub struct RateGovernor<S: DemandSource> {
    shared: Arc<Shared<S>>,
}

struct Shared<S: DemandSource> {
    controller: Mutex<Controller<S>>,
    downstream: mpsc::UnboundedSender<S::Item>,
}

impl<S: DemandSource> Clone for RateGovernor<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DemandSource> RateGovernor<S> {
    /// Wraps `source`, returning the governor handle and the downstream
    /// stream the consumer subscribes to.
    pub fn new(source: S) -> (Self, Downstream<S::Item>) {
        Self::with_clock(source, Arc::new(WallClock))
    }

    /// Like [`new`](RateGovernor::new) with an injected clock, for
    /// deterministic latency in tests.
    pub fn with_clock(source: S, clock: Arc<dyn Clock>) -> (Self, Downstream<S::Item>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let governor = Self {
            shared: Arc::new(Shared {
                controller: Mutex::new(Controller::new(source, clock)),
                downstream: sender,
            }),
        };
        (governor, Downstream { receiver })
    }

    /// Notifies the governor that the source has one more item to offer.
    /// Call once per announced item, before the governor may request it.
    pub fn item_available(&self) {
        let mut controller = self.lock();
        let admitted = controller.note_available();
        self.deliver(admitted);
    }

    /// Settles one delivered item and re-runs admission.
    ///
    /// Must be called exactly once per delivered item, after that item's
    /// asynchronous work has settled, success or failure alike; the governor
    /// never inspects the outcome.
    ///
    /// # Panics
    ///
    /// Panics if there is nothing to settle: an item was "completed" that was
    /// never requested, which would otherwise silently corrupt the counters.
    /// Use [`try_govern_rate`](RateGovernor::try_govern_rate) for the typed
    /// error instead.
    pub fn govern_rate(&self) {
        if let Err(error) = self.try_govern_rate() {
            panic!("{error}");
        }
    }

    /// Fallible form of [`govern_rate`](RateGovernor::govern_rate).
    pub fn try_govern_rate(&self) -> Result<(), GovernorError> {
        let mut controller = self.lock();
        let admitted = controller.settle()?;
        self.deliver(admitted);
        Ok(())
    }

    /// Returns a guard that settles one delivered item when dropped, so the
    /// settle call happens on every exit path of the per-item work.
    pub fn settle_on_drop(&self) -> SettleGuard<S> {
        SettleGuard {
            governor: self.clone(),
        }
    }

    /// Live rate: the active batch once it has a completion, else the last
    /// finalized batch, else `{count: 0, ms_per_item: NaN}`. Side-effect
    /// free.
    pub fn rate(&self) -> RateSnapshot {
        self.lock().rate()
    }

    /// Items delivered but not yet settled in the active batch.
    pub fn in_progress(&self) -> usize {
        self.lock().in_progress()
    }

    /// Current target number of simultaneously in-flight items. Always ≥ 1.
    pub fn concurrency_level(&self) -> usize {
        self.lock().concurrency_level()
    }

    /// Items announced by the source but not yet requested downstream.
    pub fn available(&self) -> usize {
        self.lock().available()
    }

    /// Overall totals across all batches.
    pub fn totals(&self) -> StreamTotals {
        self.lock().totals()
    }

    /// Overall rate since the governor was created.
    pub fn overall_rate(&self) -> RateSnapshot {
        self.lock().overall_rate()
    }

    fn lock(&self) -> MutexGuard<'_, Controller<S>> {
        self.shared
            .controller
            .lock()
            .expect("rate governor state poisoned")
    }

    /// Forwards admitted items downstream. Callers must still hold the
    /// controller lock: admission and delivery form one critical section, so
    /// racing handles cannot interleave their sends and reorder the stream.
    /// The unbounded send never blocks.
    fn deliver(&self, admitted: Vec<S::Item>) {
        for item in admitted {
            if self.shared.downstream.send(item).is_err() {
                warn!("downstream consumer dropped; discarding admitted item");
            }
        }
    }
}

impl<T> RateGovernor<QueueSource<T>> {
    /// A governor over the built-in queue source; feed it with
    /// [`offer`](RateGovernor::offer).
    pub fn from_queue() -> (Self, Downstream<T>) {
        Self::new(QueueSource::new())
    }

    /// [`from_queue`](RateGovernor::from_queue) with an injected clock.
    pub fn from_queue_with_clock(clock: Arc<dyn Clock>) -> (Self, Downstream<T>) {
        Self::with_clock(QueueSource::new(), clock)
    }

    /// Enqueues one item and announces it in a single step.
    pub fn offer(&self, item: T) {
        let mut controller = self.lock();
        controller.source_mut().push(item);
        let admitted = controller.note_available();
        self.deliver(admitted);
    }
}

/// Settles one delivered item when dropped.
///
/// Take one guard per received item before starting its work; whichever way
/// the work exits (return, `?`, panic unwind) the in-flight slot is
/// released.
pub struct SettleGuard<S: DemandSource> {
    governor: RateGovernor<S>,
}

impl<S: DemandSource> SettleGuard<S> {
    /// Settles now. Equivalent to dropping the guard; reads better at the end
    /// of a work closure.
    pub fn settle(self) {}
}

impl<S: DemandSource> Drop for SettleGuard<S> {
    fn drop(&mut self) {
        // Never panic out of a drop; a misused guard is reported instead.
        if let Err(error) = self.governor.try_govern_rate() {
            error!(%error, "settle guard dropped with nothing in flight");
        }
    }
}

/// The demand-pull stream the consumer subscribes to. Items arrive strictly
/// in the order the source produced them; the governor never reorders or
/// drops.
#[pin_project]
pub struct Downstream<T> {
    #[pin]
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Downstream<T> {
    /// Non-blocking receive, for synchronous consumers and tests.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for Downstream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.project().receiver.get_mut().poll_recv(cx)
    }
}
