use std::{
    collections::HashMap,
    sync::{atomic::Ordering, Arc, Mutex, PoisonError},
};

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};

type PollFn = Arc<dyn Fn() -> f64 + Send + Sync>;

struct State {
    registry: Registry<Key, AtomicStorage>,
    polled_gauges: Mutex<HashMap<Key, PollFn>>,
    exported: bool,
}

/// A metrics registry.
///
/// Registries come in two flavors, chosen at construction time and fixed thereafter:
///
/// - **exported**: metrics are intended to be surfaced externally, either by installing the registry as the global
///   recorder or by periodically reading [`snapshot`][Self::snapshot] from an exporter.
/// - **private**: metrics still exist and can be read by their owner, but nothing outside of the owner ever sees them.
///
/// Cloning a registry is cheap and yields a handle to the same underlying storage.
///
/// In addition to the usual counters, gauges and histograms, a registry can hold *polled gauges*: gauges whose value is
/// computed by a callback at read time. This allows for read-and-clear semantics, such as a "max since last read" value.
#[derive(Clone)]
pub struct MetricsRegistry {
    state: Arc<State>,
}

impl MetricsRegistry {
    fn new(exported: bool) -> Self {
        Self {
            state: Arc::new(State {
                registry: Registry::new(AtomicStorage),
                polled_gauges: Mutex::new(HashMap::new()),
                exported,
            }),
        }
    }

    /// Creates a new, empty registry whose metrics are meant to be exported.
    pub fn exported() -> Self {
        Self::new(true)
    }

    /// Creates a new, empty registry whose metrics are never exported.
    pub fn private() -> Self {
        Self::new(false)
    }

    /// Returns `true` if this registry is meant to be exported.
    pub fn is_exported(&self) -> bool {
        self.state.exported
    }

    /// Registers a polled gauge under the given key.
    ///
    /// The callback is invoked every time the gauge is read through [`snapshot`][Self::snapshot]. Registering a polled
    /// gauge under a key that already has one replaces the previous callback.
    ///
    /// The registry holds on to the callback, and to anything it captures, for as long as the registry lives or until
    /// the key is registered again. State captured from an owner is therefore kept alive past the owner being dropped.
    pub fn register_polled_gauge<K, F>(&self, key: K, f: F)
    where
        K: Into<Key>,
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        let mut polled_gauges = self
            .state
            .polled_gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        polled_gauges.insert(key.into(), Arc::new(f));
    }

    /// Takes a point-in-time snapshot of every metric in the registry.
    ///
    /// Polled gauges are evaluated as part of taking the snapshot, so any read-and-clear gauges are reset.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .state
            .registry
            .get_counter_handles()
            .into_iter()
            .map(|(key, counter)| (key, counter.load(Ordering::Relaxed)))
            .collect();

        let mut gauges: HashMap<Key, f64> = self
            .state
            .registry
            .get_gauge_handles()
            .into_iter()
            .map(|(key, gauge)| (key, f64::from_bits(gauge.load(Ordering::Relaxed))))
            .collect();

        // Clone the callbacks out so that we don't hold the lock while running them.
        let polled = self
            .state
            .polled_gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, f)| (key.clone(), Arc::clone(f)))
            .collect::<Vec<_>>();
        for (key, f) in polled {
            gauges.insert(key, f());
        }

        MetricsSnapshot { counters, gauges }
    }
}

impl Recorder for MetricsRegistry {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.state.registry.get_or_create_counter(key, |c| c.clone().into())
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.state.registry.get_or_create_gauge(key, |g| g.clone().into())
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.state.registry.get_or_create_histogram(key, |h| h.clone().into())
    }
}

/// A point-in-time view of the metrics held by a [`MetricsRegistry`].
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    counters: HashMap<Key, u64>,
    gauges: HashMap<Key, f64>,
}

impl MetricsSnapshot {
    /// Returns the value of the counter with the given key, or `None` if no such counter exists.
    pub fn counter<K>(&self, key: K) -> Option<u64>
    where
        K: Into<Key>,
    {
        self.counters.get(&key.into()).copied()
    }

    /// Returns the value of the gauge (regular or polled) with the given key, or `None` if no such gauge exists.
    pub fn gauge<K>(&self, key: K) -> Option<f64>
    where
        K: Into<Key>,
    {
        self.gauges.get(&key.into()).copied()
    }

    /// Returns the number of counters in the snapshot.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Returns the number of gauges, including polled gauges, in the snapshot.
    pub fn gauge_count(&self) -> usize {
        self.gauges.len()
    }
}
