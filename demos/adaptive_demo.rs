//! Simulated workload showing the governor finding a service's sweet spot.
//!
//! The fake service answers in ~20ms while at most 8 requests are in flight
//! and degrades beyond that, so the concurrency level should climb from 1 and
//! then hover near 8. Run with:
//!
//! ```sh
//! cargo run --example adaptive_demo
//! ```

use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use rate_governor::governor::RateGovernor;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::info;

const TOTAL_ITEMS: u32 = 400;
const SWEET_SPOT: usize = 8;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let (governor, mut downstream) = RateGovernor::from_queue();

    let producer = governor.clone();
    tokio::spawn(async move {
        for n in 0..TOTAL_ITEMS {
            producer.offer(n);
            if n % 25 == 0 {
                // A bursty source, like a paginated API.
                sleep(Duration::from_millis(5)).await;
            }
        }
    });

    let mut workers = JoinSet::new();
    for _ in 0..TOTAL_ITEMS {
        let item = downstream.next().await.expect("source ended early");
        let governor = governor.clone();
        let in_flight = governor.in_progress();

        workers.spawn(async move {
            let guard = governor.settle_on_drop();

            let contention = in_flight.saturating_sub(SWEET_SPOT) as u64;
            let jitter = rand::rng().random_range(0..5);
            sleep(Duration::from_millis(20 + 6 * contention + jitter)).await;

            let _ = item;
            guard.settle();
        });
    }
    while workers.join_next().await.is_some() {}

    info!(
        concurrency_level = governor.concurrency_level(),
        totals = ?governor.totals(),
        overall_ms_per_item = governor.overall_rate().ms_per_item,
        "workload drained"
    );
}
