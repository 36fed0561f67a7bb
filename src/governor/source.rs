use std::collections::VecDeque;

/// A demand-controlled source of work items.
///
/// The protocol has two halves: the caller learns that an item exists via an
/// availability notification (one [`RateGovernor::item_available`] call per
/// announced item), and later asks the source to hand over up to `count` of
/// those announced items with [`request`](DemandSource::request). The governor
/// never requests more than it has been told is available, so a conforming
/// source always returns exactly `count` items, in the order they were
/// announced.
///
/// [`RateGovernor::item_available`]: super::RateGovernor::item_available
pub trait DemandSource {
    type Item;

    /// Delivers exactly `count` previously announced, not-yet-delivered items
    /// in announcement order.
    fn request(&mut self, count: usize) -> Vec<Self::Item>;
}

/// The built-in queue-backed source: announced items are buffered until the
/// governor requests them.
///
/// Use [`RateGovernor::from_queue`](super::RateGovernor::from_queue) to get a
/// governor over this source and feed it with
/// [`offer`](super::RateGovernor::offer); custom sources (paginated APIs,
/// directory walks) implement [`DemandSource`] themselves.
pub struct QueueSource<T> {
    queue: VecDeque<T>,
}

impl<T> QueueSource<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub(super) fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }
}

impl<T> Default for QueueSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DemandSource for QueueSource<T> {
    type Item = T;

    fn request(&mut self, count: usize) -> Vec<T> {
        debug_assert!(count <= self.queue.len(), "requested more than announced");
        self.queue.drain(..count.min(self.queue.len())).collect()
    }
}
