use std::time::{Duration, Instant};

use spin_sleep::SpinSleeper;

/// Time source for the control loops.
///
/// Every timing decision (tick period, settle timers, calibration ceilings)
/// goes through this trait so the loops can run against simulated time.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock started.
    fn now(&self) -> Duration;

    /// Block the calling task for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time with spin-assisted sleeps for accurate 10 ms ticks.
#[derive(Clone)]
pub struct SystemClock {
    start: Instant,
    sleeper: SpinSleeper,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            sleeper: SpinSleeper::new(10_000),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeper.sleep(duration);
    }
}
