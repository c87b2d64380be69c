use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use metrics::Counter;
use relay_metrics::{BurstRateTracker, MetricsBuilder, MetricsRegistry};

use crate::queue::QueueInfo;

/// The registries a handler registers its metrics against.
///
/// The exported registry receives the metrics that are always surfaced (sent, rejected). The private registry receives
/// the received/blocked metrics of handlers that are configured to not report received stats.
#[derive(Clone)]
pub struct HandlerRegistries {
    exported: MetricsRegistry,
    private: MetricsRegistry,
}

impl HandlerRegistries {
    /// Creates a new `HandlerRegistries` from an exported and a private registry.
    pub fn new(exported: MetricsRegistry, private: MetricsRegistry) -> Self {
        Self { exported, private }
    }

    /// Returns the exported registry.
    pub fn exported(&self) -> &MetricsRegistry {
        &self.exported
    }

    /// Returns the private registry.
    pub fn private(&self) -> &MetricsRegistry {
        &self.private
    }
}

/// A counter that can be read back by its owner.
struct TrackedCounter {
    counter: Counter,
    total: AtomicU64,
}

impl TrackedCounter {
    fn new(counter: Counter) -> Self {
        Self {
            counter,
            total: AtomicU64::new(0),
        }
    }

    fn increment(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
        self.counter.increment(n);
    }

    fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Throughput and failure statistics of a single handler.
///
/// All counters are monotonic for the lifetime of the handler and safe to update from any number of threads.
pub struct HandlerStats {
    received: Arc<BurstRateTracker>,
    sent: TrackedCounter,
    blocked: TrackedCounter,
    rejected: TrackedCounter,
}

impl HandlerStats {
    pub(super) fn register(
        handler: &str, queue: &dyn QueueInfo, registries: &HandlerRegistries, report_received_stats: bool,
    ) -> Self {
        let exported = MetricsBuilder::new(registries.exported.clone(), format!("{}.{}", handler, queue.name()));
        let received_builder = if report_received_stats {
            exported.clone()
        } else {
            exported.with_registry(registries.private.clone())
        };

        let received = Arc::new(BurstRateTracker::new(received_builder.register_counter("received")));
        let tracker = Arc::clone(&received);
        received_builder.register_polled_gauge("received.max-burst-rate", move || tracker.max_burst_rate_and_clear());

        Self {
            received,
            sent: TrackedCounter::new(exported.register_counter("sent")),
            blocked: TrackedCounter::new(received_builder.register_counter("blocked")),
            rejected: TrackedCounter::new(exported.register_counter("rejected")),
        }
    }

    /// Records `n` received items.
    pub fn record_received(&self, n: u64) {
        self.received.increment(n);
    }

    /// Records `n` items handed off for sending.
    pub fn record_sent(&self, n: u64) {
        self.sent.increment(n);
    }

    pub(super) fn record_blocked(&self) {
        self.blocked.increment(1);
    }

    pub(super) fn record_rejected(&self) {
        self.blocked.increment(1);
        self.rejected.increment(1);
    }

    /// Returns the number of received items.
    pub fn received(&self) -> u64 {
        self.received.count()
    }

    /// Returns the number of items handed off for sending.
    pub fn sent(&self) -> u64 {
        self.sent.count()
    }

    /// Returns the number of blocked items, including rejected ones.
    pub fn blocked(&self) -> u64 {
        self.blocked.count()
    }

    /// Returns the number of rejected items.
    pub fn rejected(&self) -> u64 {
        self.rejected.count()
    }

    /// Returns the received-rate tracker.
    pub fn received_rates(&self) -> &BurstRateTracker {
        &self.received
    }
}
