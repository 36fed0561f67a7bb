//! Telemetry for governor decisions.
//!
//! Every decision point records a metric and emits a tracing event under the
//! `rate_governor::stats` target. These are histograms rather than gauges as
//! the values may change many times within one reporting interval and each
//! reading is valuable for diagnosis.

use metrics::{counter, histogram};

use super::counter::RateSnapshot;

pub(super) fn emit_concurrency_adjusted(concurrency: usize, measured: RateSnapshot) {
    histogram!("rate_governor_concurrency_level").record(concurrency as f64);
    histogram!("rate_governor_batch_ms_per_item").record(measured.ms_per_item);

    debug!(
        target: "rate_governor::stats",
        concurrency_level = concurrency,
        batch_items = measured.count,
        batch_ms_per_item = measured.ms_per_item,
        "concurrency adjusted"
    );
}

pub(super) fn emit_in_flight(in_flight: usize) {
    histogram!("rate_governor_in_flight").record(in_flight as f64);

    trace!(
        target: "rate_governor::stats",
        in_flight,
        "in-flight updated"
    );
}

pub(super) fn emit_batch_discarded(completed: usize, target_len: usize) {
    counter!("rate_governor_incomplete_batches_total").increment(1);

    debug!(
        target: "rate_governor::stats",
        completed,
        target_len,
        "source ran dry; measurement batch discarded without adjustment"
    );
}
