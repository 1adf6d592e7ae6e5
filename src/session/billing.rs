use std::future;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Per-session repeating timer.
///
/// The first firing is one full period after arming. While disarmed,
/// [`BillingClock::tick`] never completes, so it can sit in a `select!`
/// next to other branches.
#[derive(Debug)]
pub struct BillingClock {
    period: Duration,
    interval: Option<Interval>,
}

impl BillingClock {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Start the clock. Returns `false` if it was already running.
    pub fn arm(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        true
    }

    /// Release the timer. Returns `false` if it was not running.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next firing. Cancel safe.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => future::pending().await,
        }
    }
}
