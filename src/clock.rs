//! Time source shared by the scheduler, the sampler and the auth session.
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Source of time for the node.
///
/// `monotonic` drives interval decisions and never goes backwards; `utc_now` is only used
/// for record timestamps and token expiry.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn monotonic(&self) -> Duration;
    /// Current wall clock time.
    fn utc_now(&self) -> DateTime<Utc>;
    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { started: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.started.elapsed()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub use self::manual::ManualClock;
