//! Adaptive concurrency governor for pull-demand streams.
//!
//! This crate sits between a demand-controlled source of work items and a
//! consumer that performs asynchronous work per item, and continuously decides
//! how many items may be in flight at once. There is no configuration knob:
//! the governor measures the live per-item latency over fixed-length batches
//! and hill-climbs the concurrency level by ±1 between batches.
//!
//! # Algorithm overview
//!
//! 1. Items are admitted downstream up to the current concurrency level.
//! 2. Every `concurrency × 10` completions form one measurement batch; the
//!    batch's per-item latency is compared against the previous batch.
//! 3. If the latest batch was no faster, the search direction flips; the
//!    concurrency level then moves one step in the current direction, with a
//!    floor of 1.
//!
//! The consumer must call [`governor::RateGovernor::govern_rate`] exactly once
//! per delivered item once that item's work has settled, success or failure
//! alike.
//!
//! # Basic usage
//!
//! ```
//! use rate_governor::governor::RateGovernor;
//!
//! let (governor, mut downstream) = RateGovernor::from_queue();
//!
//! for n in 0..40u32 {
//!     governor.offer(n);
//! }
//!
//! while let Some(_item) = downstream.try_recv() {
//!     // ... perform the work for `_item` ...
//!     governor.govern_rate();
//! }
//!
//! assert!(governor.concurrency_level() >= 1);
//! ```
pub mod governor;

#[macro_use]
extern crate tracing;
