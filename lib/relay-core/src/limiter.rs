//! Rate limiting.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use snafu::Snafu;
use tokio::time::Instant;

/// A rate limiter error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum LimiterError {
    /// The requested rate was zero, negative, or not a finite number.
    #[snafu(display("Rate limiter rate must be a finite, positive number (got {}).", rate))]
    InvalidRate {
        /// Requested permits per second.
        rate: f64,
    },
}

/// A token bucket rate limiter.
///
/// Permits are issued at a fixed rate. Unused permits accumulate for up to one second's worth (and never less than a
/// single permit), which allows short bursts after a quiet period. A fresh limiter holds exactly one permit, so the
/// first request is always granted.
///
/// Acquisition never blocks: [`try_acquire`][Self::try_acquire] either takes a permit immediately or reports that none
/// is available.
///
/// Internally this is tracked as a "theoretical arrival time" (the earliest instant at which the bucket would be empty
/// again) rather than a fractional token count, which keeps the arithmetic exact.
#[derive(Debug)]
pub struct RateLimiter {
    permits_per_second: f64,
    interval: Duration,
    burst_tolerance: Duration,
    theoretical_arrival: Mutex<Instant>,
}

impl RateLimiter {
    /// Creates a new `RateLimiter` issuing `permits_per_second` permits every second.
    ///
    /// # Errors
    ///
    /// If `permits_per_second` is not a finite, positive number, an error is returned.
    pub fn new(permits_per_second: f64) -> Result<Self, LimiterError> {
        if !permits_per_second.is_finite() || permits_per_second <= 0.0 {
            return Err(LimiterError::InvalidRate {
                rate: permits_per_second,
            });
        }

        let interval_nanos = (1_000_000_000.0 / permits_per_second).round().max(1.0) as u64;
        let interval = Duration::from_nanos(interval_nanos);

        let capacity = permits_per_second.floor().max(1.0) as u32;
        let burst_tolerance = interval * (capacity - 1);

        Ok(Self {
            permits_per_second,
            interval,
            burst_tolerance,
            // Start out as if the bucket had just been drained down to a single permit.
            theoretical_arrival: Mutex::new(Instant::now() + burst_tolerance),
        })
    }

    /// Returns the configured rate, in permits per second.
    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }

    /// Attempts to acquire a single permit without waiting.
    ///
    /// Returns `true` if a permit was acquired.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut theoretical_arrival = self
            .theoretical_arrival
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let candidate = (*theoretical_arrival).max(now);
        if candidate.saturating_duration_since(now) <= self.burst_tolerance {
            *theoretical_arrival = candidate + self.interval;
            true
        } else {
            false
        }
    }
}
