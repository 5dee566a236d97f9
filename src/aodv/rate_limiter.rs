//! Global minimum interval between route requests.
use chrono::{DateTime, Duration, Utc};

/// Single-outstanding timer shared by every destination.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    interval: Duration,
    next_time: Option<DateTime<Utc>>,
}

impl RateLimiter {
    /// New limiter, initially disarmed.
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            next_time: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True when disarmed or when the deadline has passed.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        match self.next_time {
            Some(deadline) => deadline <= now,
            None => true,
        }
    }

    /// Starts the interval at `now`.
    pub fn arm(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let deadline = now + self.interval;
        self.next_time = Some(deadline);
        deadline
    }

    /// Outstanding deadline, if armed.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.next_time
    }

    pub fn reset(&mut self) {
        self.next_time = None;
    }
}
