//! Wall-clock seam.

use chrono::{DateTime, Utc};

/// Source of wall-clock time for outcomes, snapshots and wake-timer deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
