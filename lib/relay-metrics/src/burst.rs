use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use metrics::Counter;

/// How often [`BurstRateTracker::sample`] is expected to be called.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

// Five minutes worth of one-second samples.
const HISTORY_LEN: usize = 300;
const ONE_MINUTE_LEN: usize = 60;

struct Samples {
    last_total: u64,
    history: VecDeque<u64>,
}

/// A counter that tracks its rate of change over rolling windows.
///
/// Increments are lock-free. Once per [`SAMPLE_INTERVAL`], the owner calls [`sample`][Self::sample], which records how
/// much the counter moved since the previous sample. Rates are derived from the last five minutes of samples:
///
/// - the current rate is the most recent sample
/// - the one-minute and five-minute rates are the mean of the most recent 60 and 300 samples, respectively (or of all
///   samples, if fewer have been taken so far)
/// - the max burst rate is the highest sample seen since it was last read, and resets on read
///
/// Every increment is mirrored to the wrapped [`Counter`], so the tracker can stand in for a regular counter.
pub struct BurstRateTracker {
    counter: Counter,
    total: AtomicU64,
    max_burst_rate: AtomicU64,
    samples: Mutex<Samples>,
}

impl BurstRateTracker {
    /// Creates a new `BurstRateTracker` that mirrors increments to `counter`.
    pub fn new(counter: Counter) -> Self {
        Self {
            counter,
            total: AtomicU64::new(0),
            max_burst_rate: AtomicU64::new(0.0f64.to_bits()),
            samples: Mutex::new(Samples {
                last_total: 0,
                history: VecDeque::with_capacity(HISTORY_LEN),
            }),
        }
    }

    /// Increments the counter by `n`.
    pub fn increment(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
        self.counter.increment(n);
    }

    /// Returns the total count since creation.
    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Records a sample of the change since the previous sample.
    pub fn sample(&self) {
        let total = self.total.load(Ordering::Relaxed);
        let delta = {
            let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
            let delta = total.saturating_sub(samples.last_total);
            samples.last_total = total;
            if samples.history.len() == HISTORY_LEN {
                samples.history.pop_front();
            }
            samples.history.push_back(delta);
            delta
        };

        let rate = delta as f64 / SAMPLE_INTERVAL.as_secs_f64();
        let _ = self
            .max_burst_rate
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (rate > f64::from_bits(current)).then_some(rate.to_bits())
            });
    }

    /// Returns the rate observed in the most recent sample.
    pub fn current_rate(&self) -> f64 {
        self.with_history(|history| history.back().copied().unwrap_or(0) as f64) / SAMPLE_INTERVAL.as_secs_f64()
    }

    /// Returns the mean rate over the last minute.
    pub fn one_minute_rate(&self) -> f64 {
        self.mean_rate(ONE_MINUTE_LEN)
    }

    /// Returns the mean rate over the last five minutes.
    pub fn five_minute_rate(&self) -> f64 {
        self.mean_rate(HISTORY_LEN)
    }

    /// Returns the total count accumulated over the last five minutes of samples.
    pub fn five_minute_count(&self) -> u64 {
        self.with_history(|history| history.iter().sum())
    }

    /// Returns the highest rate seen since the last call, and resets it to zero.
    pub fn max_burst_rate_and_clear(&self) -> f64 {
        f64::from_bits(self.max_burst_rate.swap(0.0f64.to_bits(), Ordering::AcqRel))
    }

    fn mean_rate(&self, window: usize) -> f64 {
        let (sum, len) = self.with_history(|history| {
            let len = history.len().min(window);
            let sum: u64 = history.iter().rev().take(len).sum();
            (sum, len)
        });

        if len == 0 {
            0.0
        } else {
            sum as f64 / (len as f64 * SAMPLE_INTERVAL.as_secs_f64())
        }
    }

    fn with_history<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&VecDeque<u64>) -> T,
    {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        f(&samples.history)
    }
}

/// Formats a rate for human consumption.
///
/// Rates below 10 keep a single decimal place, while larger rates are rounded to the nearest integer.
pub fn printable_rate(rate: f64) -> String {
    if rate < 10.0 {
        format!("{}", (rate * 10.0).round() / 10.0)
    } else {
        format!("{}", rate.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{MetricsBuilder, MetricsRegistry};

    fn tracker() -> (MetricsRegistry, BurstRateTracker) {
        let registry = MetricsRegistry::exported();
        let counter = MetricsBuilder::new(registry.clone(), "h.q").register_counter("received");
        (registry, BurstRateTracker::new(counter))
    }

    #[test]
    fn empty_tracker_reports_zero() {
        let (_, tracker) = tracker();

        assert_eq!(tracker.current_rate(), 0.0);
        assert_eq!(tracker.one_minute_rate(), 0.0);
        assert_eq!(tracker.five_minute_rate(), 0.0);
        assert_eq!(tracker.five_minute_count(), 0);
        assert_eq!(tracker.max_burst_rate_and_clear(), 0.0);
    }

    #[test]
    fn mirrors_increments_to_counter() {
        let (registry, tracker) = tracker();

        tracker.increment(3);
        tracker.increment(4);

        assert_eq!(tracker.count(), 7);
        assert_eq!(registry.snapshot().counter("h.q.received"), Some(7));
    }

    #[test]
    fn rates_follow_samples() {
        let (_, tracker) = tracker();

        tracker.increment(10);
        tracker.sample();
        tracker.increment(30);
        tracker.sample();

        assert_eq!(tracker.current_rate(), 30.0);
        assert_eq!(tracker.one_minute_rate(), 20.0);
        assert_eq!(tracker.five_minute_rate(), 20.0);
        assert_eq!(tracker.five_minute_count(), 40);
    }

    #[test]
    fn one_minute_window_drops_old_samples() {
        let (_, tracker) = tracker();

        tracker.increment(600);
        tracker.sample();
        for _ in 0..60 {
            tracker.sample();
        }

        assert_eq!(tracker.one_minute_rate(), 0.0);
        assert_eq!(tracker.five_minute_count(), 600);
    }

    #[test]
    fn five_minute_window_is_bounded() {
        let (_, tracker) = tracker();

        tracker.increment(5);
        tracker.sample();
        for _ in 0..HISTORY_LEN {
            tracker.sample();
        }

        assert_eq!(tracker.five_minute_count(), 0);
    }

    #[test]
    fn max_burst_rate_clears_on_read() {
        let (_, tracker) = tracker();

        tracker.increment(50);
        tracker.sample();
        tracker.increment(5);
        tracker.sample();

        assert_eq!(tracker.max_burst_rate_and_clear(), 50.0);
        assert_eq!(tracker.max_burst_rate_and_clear(), 0.0);

        tracker.increment(8);
        tracker.sample();
        assert_eq!(tracker.max_burst_rate_and_clear(), 8.0);
    }

    #[test]
    fn printable_rates() {
        assert_eq!(printable_rate(0.0), "0");
        assert_eq!(printable_rate(0.04), "0");
        assert_eq!(printable_rate(3.26), "3.3");
        assert_eq!(printable_rate(9.94), "9.9");
        assert_eq!(printable_rate(10.4), "10");
        assert_eq!(printable_rate(1234.5), "1235");
    }

    proptest! {
        #[test]
        fn five_minute_count_matches_increments(increments in proptest::collection::vec(0u64..1000, 1..HISTORY_LEN)) {
            let (_, tracker) = tracker();
            for n in &increments {
                tracker.increment(*n);
                tracker.sample();
            }

            prop_assert_eq!(tracker.five_minute_count(), increments.iter().sum::<u64>());
            prop_assert_eq!(tracker.current_rate(), *increments.last().unwrap() as f64);
        }
    }
}
