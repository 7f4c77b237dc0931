use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the timestamps sampled on a node's `start_time`/`end_time`.
/// Injectable so instrumentation-ordering tests can use a deterministic
/// clock instead of the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Milliseconds since the Unix epoch. The default clock when none is
/// supplied to `run`.
#[derive(Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as u64
    }
}

/// A clock that advances by a fixed step on every sample, for tests that
/// assert on the relative order of timestamps (scenario 7: instrumentation
/// ordering).
pub struct FakeClock {
    next: AtomicU64,
    step: u64,
}

impl FakeClock {
    pub fn new(step: u64) -> Self {
        FakeClock {
            next: AtomicU64::new(0),
            step,
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }
}
