//! Self-correcting fixed-frequency pacer
//!
//! Each [`Rate::sleep`] measures from the previous wake-up rather than from a
//! fixed schedule, so the time spent in the loop body is absorbed into the
//! next sleep instead of accumulating.

use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Rate {
    frequency: f64,
    period: Duration,
    last_wake: Instant,
    overruns: u64,
}

impl Rate {
    pub fn new(frequency: f64) -> Self {
        let mut rate = Self {
            frequency: 10.0,
            period: Duration::from_millis(100),
            last_wake: Instant::now(),
            overruns: 0,
        };
        rate.set_rate(frequency);
        rate
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of cycles that ran longer than one period
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Recompute the target period. Non-positive or non-finite rates are ignored.
    pub fn set_rate(&mut self, frequency: f64) {
        if !(frequency.is_finite() && frequency > 0.0) {
            warn!(frequency, "Ignoring invalid rate");
            return;
        }
        self.frequency = frequency;
        self.period = Duration::from_secs_f64(1.0 / frequency);
    }

    /// Record the baseline the first `sleep` measures from.
    pub fn init(&mut self) {
        self.last_wake = Instant::now();
    }

    /// Sleep out the remainder of the current period.
    ///
    /// Returns the overrun when the cycle already took longer than a period.
    pub fn sleep(&mut self) -> Option<Duration> {
        let elapsed = self.last_wake.elapsed();

        let overrun = match lateness(self.period, elapsed) {
            None => {
                thread::sleep(self.period.saturating_sub(elapsed));
                None
            }
            Some(overrun) => {
                self.overruns += 1;
                metrics::counter!("rate_overruns_total").increment(1);
                warn!("Rate overrun: {} ns", overrun.as_nanos());
                Some(overrun)
            }
        };

        self.last_wake = Instant::now();
        overrun
    }
}

/// How far `elapsed` ran past `period`. A cycle that ends exactly on the
/// period boundary is on time.
fn lateness(period: Duration, elapsed: Duration) -> Option<Duration> {
    elapsed.checked_sub(period).filter(|late| !late.is_zero())
}

impl Default for Rate {
    fn default() -> Self {
        Self::new(10.0)
    }
}
