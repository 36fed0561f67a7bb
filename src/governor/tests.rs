use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_test::{assert_pending, assert_ready_eq, task};

use super::clock::{Clock, ManualClock};
use super::controller::GovernorError;
use super::source::QueueSource;
use super::stream::{Downstream, RateGovernor};

/// Drives a queue-backed governor with a manual clock, collecting everything
/// the downstream stream emits.
struct Harness {
    governor: RateGovernor<QueueSource<u32>>,
    downstream: Downstream<u32>,
    clock: Arc<ManualClock>,
    received: Vec<u32>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let (governor, downstream) =
            RateGovernor::from_queue_with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
        Self {
            governor,
            downstream,
            clock,
            received: Vec::new(),
        }
    }

    fn offer(&mut self, items: Range<u32>) {
        for item in items {
            self.governor.offer(item);
        }
        self.pump();
    }

    fn pump(&mut self) {
        while let Some(item) = self.downstream.try_recv() {
            self.received.push(item);
        }
    }

    /// Advances the clock once, then settles `count` items.
    fn complete(&mut self, count: usize, elapsed_ms: u64) {
        self.clock.advance(Duration::from_millis(elapsed_ms));
        for _ in 0..count {
            self.governor.govern_rate();
        }
        self.pump();
    }

    fn assert_rate(&self, count: usize, ms_per_item: f64) {
        let rate = self.governor.rate();
        assert_eq!(rate.count, count, "rate count");
        if ms_per_item.is_nan() {
            assert!(rate.ms_per_item.is_nan(), "expected NaN ms/item");
        } else {
            assert_eq!(rate.ms_per_item, ms_per_item, "ms/item");
        }
    }
}

#[test]
fn emits_one_item_immediately_when_items_are_preannounced() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    harness.assert_rate(0, f64::NAN);
    assert_eq!(harness.governor.concurrency_level(), 1);
    assert_eq!(harness.governor.in_progress(), 1);
    assert_eq!(harness.received, vec![0]);
}

#[test]
fn first_batch_runs_one_item_at_a_time() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    for completed in 0..10u32 {
        harness.assert_rate(completed as usize, if completed == 0 { f64::NAN } else { 1000.0 });
        assert_eq!(harness.received, (0..=completed).collect::<Vec<_>>());
        assert_eq!(harness.governor.concurrency_level(), 1);
        harness.complete(1, 1000);
    }
}

#[test]
fn tenth_completion_raises_concurrency_to_two() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    for _ in 0..10 {
        harness.complete(1, 1000);
    }

    harness.assert_rate(10, 1000.0);
    assert_eq!(harness.governor.concurrency_level(), 2);
    assert_eq!(harness.governor.in_progress(), 2);
    assert_eq!(harness.received, (0..12).collect::<Vec<_>>());
}

#[test]
fn faster_second_batch_raises_concurrency_to_three() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    for _ in 0..10 {
        harness.complete(1, 1000);
    }

    // 20 completions at 500ms/item: an improvement, keep climbing.
    harness.complete(2, 1000);
    for completed in 1..10 {
        harness.assert_rate(completed * 2, 500.0);
        harness.complete(2, 1000);
    }

    harness.assert_rate(20, 500.0);
    assert_eq!(harness.governor.concurrency_level(), 3);
    assert_eq!(harness.received, (0..33).collect::<Vec<_>>());
}

#[test]
fn slower_second_batch_drops_concurrency_back_to_one() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    for _ in 0..10 {
        harness.complete(1, 1000);
    }

    // 20 completions at 1500ms/item: a regression while climbing, flip down.
    for completed in 0..10 {
        if completed > 0 {
            harness.assert_rate(completed * 2, 1500.0);
        }
        harness.complete(2, 3000);
    }

    harness.assert_rate(20, 1500.0);
    assert_eq!(harness.governor.concurrency_level(), 1);
    assert_eq!(harness.received, (0..31).collect::<Vec<_>>());
}

#[test]
fn equal_rate_batch_still_drops_concurrency() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    for _ in 0..10 {
        harness.complete(1, 1000);
    }

    // Exactly the baseline rate: the tie-break favors contraction while
    // searching upward, so a plateau cannot hold concurrency up forever.
    for _ in 0..10 {
        harness.complete(2, 2000);
    }

    harness.assert_rate(20, 1000.0);
    assert_eq!(harness.governor.concurrency_level(), 1);
}

#[test]
fn concurrency_never_drops_below_one() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    for _ in 0..10 {
        harness.complete(1, 1000);
    }
    for _ in 0..10 {
        harness.complete(2, 3000);
    }

    harness.assert_rate(20, 1500.0);
    assert_eq!(harness.governor.concurrency_level(), 1);

    // Faster batches at the floor, still searching downward: stay at 1.
    for _ in 0..10 {
        harness.complete(1, 500);
    }

    harness.assert_rate(10, 500.0);
    assert_eq!(harness.governor.concurrency_level(), 1);
}

#[test]
fn in_flight_never_exceeds_the_concurrency_level() {
    let mut harness = Harness::new();
    harness.offer(0..200);

    let mut settled = 0;
    let mut elapsed = 400;
    while settled < 180 {
        assert!(harness.governor.in_progress() <= harness.governor.concurrency_level());
        let batch = harness.governor.in_progress().max(1);
        harness.complete(batch, elapsed);
        settled += batch;
        // Vary latency so the hill-climb moves in both directions.
        elapsed = if elapsed == 400 { 1100 } else { 400 };
        assert!(harness.governor.concurrency_level() >= 1);
    }
}

#[test]
fn delivery_order_matches_announcement_order() {
    let mut harness = Harness::new();
    harness.offer(0..100);

    while harness.governor.in_progress() > 0 {
        harness.complete(harness.governor.in_progress(), 700);
    }

    assert_eq!(harness.governor.totals().complete, 100);
    assert_eq!(harness.received, (0..100).collect::<Vec<_>>());
}

#[test]
fn concurrent_offers_and_settles_preserve_delivery_order() {
    let (governor, mut downstream) = RateGovernor::from_queue();

    // A producer thread races the settling consumer, so offers interleave
    // with the admission bursts triggered by finalized batches.
    let producer = governor.clone();
    let handle = std::thread::spawn(move || {
        for n in 0..500u32 {
            producer.offer(n);
        }
    });

    let mut received = Vec::with_capacity(500);
    while received.len() < 500 {
        match downstream.try_recv() {
            Some(item) => {
                received.push(item);
                governor.govern_rate();
            }
            None => std::thread::yield_now(),
        }
    }

    handle.join().expect("producer thread panicked");
    assert_eq!(received, (0..500).collect::<Vec<_>>());
    assert_eq!(governor.totals().complete, 500);
}

#[test]
fn starved_source_discards_the_batch_without_adjusting() {
    let mut harness = Harness::new();
    harness.offer(0..7);

    for completed in 0..7 {
        harness.assert_rate(completed, if completed == 0 { f64::NAN } else { 1000.0 });
        harness.complete(1, 1000);
    }

    // Seven of ten completions, nothing left: the batch is retired unmeasured
    // and the baseline is cleared.
    assert_eq!(harness.governor.concurrency_level(), 1);
    assert_eq!(harness.governor.in_progress(), 0);
    harness.assert_rate(0, f64::NAN);

    // Measurement resumes when the source picks back up, with no baseline to
    // compare against: the first full batch adjusts without flipping.
    harness.offer(7..27);
    for _ in 0..10 {
        harness.complete(1, 500);
    }

    assert_eq!(harness.governor.concurrency_level(), 2);
    harness.assert_rate(10, 500.0);
    assert_eq!(harness.governor.totals().complete, 17);
}

#[test]
#[should_panic(expected = "no measurement batch active")]
fn settling_with_nothing_requested_is_fatal() {
    let (governor, _downstream) = RateGovernor::<QueueSource<u32>>::from_queue();
    governor.govern_rate();
}

#[test]
fn try_govern_rate_reports_the_violation_instead_of_panicking() {
    let (governor, _downstream) = RateGovernor::<QueueSource<u32>>::from_queue();
    assert!(matches!(
        governor.try_govern_rate(),
        Err(GovernorError::SettleWithoutBatch)
    ));
}

#[test]
fn settle_guard_releases_the_slot_on_drop() {
    let mut harness = Harness::new();
    harness.offer(0..40);
    assert_eq!(harness.governor.in_progress(), 1);

    {
        let _guard = harness.governor.settle_on_drop();
        // Work for the delivered item would run here; falling out of scope
        // settles it even on an early return or unwind.
    }
    harness.pump();

    assert_eq!(harness.governor.totals().complete, 1);
    assert_eq!(harness.governor.in_progress(), 1);
    assert_eq!(harness.received, vec![0, 1]);
}

#[test]
fn overall_totals_span_batches() {
    let mut harness = Harness::new();
    harness.offer(0..80);

    for _ in 0..10 {
        harness.complete(1, 1000);
    }
    for _ in 0..10 {
        harness.complete(2, 1000);
    }

    let totals = harness.governor.totals();
    assert_eq!(totals.total, 80);
    assert_eq!(totals.complete, 30);
    assert_eq!(harness.governor.available(), 80 - harness.received.len());
    assert_eq!(harness.governor.overall_rate().count, 30);
}

#[test]
fn downstream_wakes_when_an_item_is_admitted() {
    let (governor, downstream) = RateGovernor::from_queue();
    let mut downstream = task::spawn(downstream);

    assert_pending!(downstream.enter(|cx, stream| stream.poll_next(cx)));

    governor.offer(7u32);

    assert!(downstream.is_woken());
    assert_ready_eq!(
        downstream.enter(|cx, stream| stream.poll_next(cx)),
        Some(7)
    );
}

#[tokio::test]
async fn governs_an_async_consumer_end_to_end() {
    let (governor, mut downstream) = RateGovernor::from_queue();

    for n in 0..30u32 {
        governor.offer(n);
    }

    let mut received = Vec::new();
    for _ in 0..30 {
        let item = downstream.next().await.expect("stream ended early");
        received.push(item);
        governor.govern_rate();
    }

    assert_eq!(received, (0..30).collect::<Vec<_>>());
    assert_eq!(governor.totals().complete, 30);
    assert_eq!(governor.in_progress(), 0);
}
