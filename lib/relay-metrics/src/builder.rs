use metrics::{Counter, Gauge, Key, Level, Metadata, Recorder as _};

use crate::MetricsRegistry;

/// Builder for constructing metrics against a specific registry.
///
/// Every metric registered through the builder is named `<prefix>.<name>`, which keeps naming consistent between all of
/// the metrics belonging to a single owner (for example, every metric of one handler).
#[derive(Clone)]
pub struct MetricsBuilder {
    registry: MetricsRegistry,
    prefix: String,
}

impl MetricsBuilder {
    /// Creates a new `MetricsBuilder` that registers metrics in `registry` under the given prefix.
    pub fn new<P>(registry: MetricsRegistry, prefix: P) -> Self
    where
        P: Into<String>,
    {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }

    /// Returns a new builder targeting `registry`, keeping the same prefix.
    pub fn with_registry(&self, registry: MetricsRegistry) -> Self {
        Self {
            registry,
            prefix: self.prefix.clone(),
        }
    }

    /// Returns the registry metrics are registered against.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// Returns the full name a metric called `name` would be registered under.
    pub fn metric_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Registers a counter.
    pub fn register_counter(&self, name: &str) -> Counter {
        let key = Key::from_name(self.metric_name(name));
        self.registry.register_counter(&key, &metadata())
    }

    /// Registers a gauge.
    pub fn register_gauge(&self, name: &str) -> Gauge {
        let key = Key::from_name(self.metric_name(name));
        self.registry.register_gauge(&key, &metadata())
    }

    /// Registers a polled gauge, whose value is computed by `f` every time the registry is read.
    pub fn register_polled_gauge<F>(&self, name: &str, f: F)
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.registry.register_polled_gauge(self.metric_name(name), f);
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_metric_names() {
        let registry = MetricsRegistry::exported();
        let builder = MetricsBuilder::new(registry.clone(), "listener.points.2878");

        builder.register_counter("sent").increment(4);
        builder.register_gauge("queued").set(2.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counter("listener.points.2878.sent"), Some(4));
        assert_eq!(snapshot.gauge("listener.points.2878.queued"), Some(2.0));
    }

    #[test]
    fn empty_prefix() {
        let builder = MetricsBuilder::new(MetricsRegistry::private(), "");
        assert_eq!(builder.metric_name("sent"), "sent");
    }

    #[test]
    fn with_registry_keeps_prefix() {
        let exported = MetricsRegistry::exported();
        let private = MetricsRegistry::private();
        let builder = MetricsBuilder::new(exported.clone(), "h.q");

        builder.with_registry(private.clone()).register_counter("blocked").increment(1);
        builder.register_polled_gauge("burst", || 7.0);

        assert_eq!(private.snapshot().counter("h.q.blocked"), Some(1));
        assert_eq!(exported.snapshot().counter("h.q.blocked"), None);
        assert_eq!(exported.snapshot().gauge("h.q.burst"), Some(7.0));
    }
}
