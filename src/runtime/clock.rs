//! Wall-clock timer for the periodic world message.

use chrono::{DateTime, Duration, Utc};

/// Tracks when the periodic broadcast last went out.
#[derive(Debug, Clone)]
pub struct TickClock {
    last: DateTime<Utc>,
    interval: Duration,
}

impl TickClock {
    pub fn new(start: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            last: start,
            interval,
        }
    }

    /// True once per elapsed interval; resets the clock when it fires.
    pub fn due(&mut self, now: DateTime<Utc>) -> bool {
        if now > self.last + self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }

    pub fn last(&self) -> DateTime<Utc> {
        self.last
    }
}
