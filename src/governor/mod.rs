//! Flow control for one pull-demand stream.
//!
//! [`RateGovernor`] wraps a [`DemandSource`] and re-exposes its items as a
//! demand-pull [`Downstream`] stream, deciding on its own how many items the
//! consumer may have in flight simultaneously. The decision loop is a
//! hill-climbing search over batch latency measurements; see the crate docs
//! for the algorithm.

mod clock;
mod controller;
mod counter;
mod internal_event;
mod source;
mod stream;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, WallClock};
pub use controller::GovernorError;
pub use counter::{RateSnapshot, StreamCounter, StreamTotals};
pub use source::{DemandSource, QueueSource};
pub use stream::{Downstream, RateGovernor, SettleGuard};
