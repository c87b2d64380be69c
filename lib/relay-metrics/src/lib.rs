//! Metrics primitives.
//!
//! Registries are always passed around explicitly: callers decide, at construction time, whether a given set of metrics
//! lands in an exported registry or a private one.
#![deny(missing_docs)]

mod builder;
pub use self::builder::MetricsBuilder;

mod burst;
pub use self::burst::{printable_rate, BurstRateTracker, SAMPLE_INTERVAL};

mod registry;
pub use self::registry::{MetricsRegistry, MetricsSnapshot};
