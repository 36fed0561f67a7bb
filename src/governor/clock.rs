use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time source for latency measurement. Only differences between successive
/// readings are ever used, so any monotonic (or wall) clock will do.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The default clock. Reads through `tokio::time` so that tests running under
/// a paused tokio runtime observe the frozen time.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into()
    }
}

/// A clock advanced by hand, for deterministic latency in tests.
#[derive(Debug)]
pub struct ManualClock {
    epoch: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward. Never moves it back.
    pub fn advance(&self, elapsed: Duration) {
        self.offset_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.epoch + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}
