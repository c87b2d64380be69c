//! Queue identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of telemetry data a queue carries.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum EntityType {
    /// Metric data points.
    #[serde(rename = "points")]
    Point,

    /// Delta counters.
    #[serde(rename = "deltaCounter")]
    DeltaCounter,

    /// Histogram distributions.
    #[serde(rename = "histograms")]
    Histogram,

    /// Source tag updates.
    #[serde(rename = "sourceTags")]
    SourceTag,

    /// Trace spans.
    #[serde(rename = "spans")]
    TraceSpan,

    /// Logs attached to trace spans.
    #[serde(rename = "spanLogs")]
    TraceSpanLogs,

    /// Events.
    #[serde(rename = "events")]
    Event,

    /// Log lines.
    #[serde(rename = "logs")]
    Log,
}

impl EntityType {
    /// Returns the display name of the entity type, e.g. `points`.
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Point => "points",
            Self::DeltaCounter => "deltaCounter",
            Self::Histogram => "histograms",
            Self::SourceTag => "sourceTags",
            Self::TraceSpan => "spans",
            Self::TraceSpanLogs => "spanLogs",
            Self::Event => "events",
            Self::Log => "logs",
        }
    }

    /// Returns the unit rates of this entity type are expressed in, e.g. `pps`.
    pub const fn rate_unit(&self) -> &'static str {
        match self {
            Self::Point | Self::DeltaCounter => "pps",
            Self::Histogram => "dps",
            Self::SourceTag => "tags/s",
            Self::TraceSpan => "sps",
            Self::TraceSpanLogs | Self::Log => "logs/s",
            Self::Event => "eps",
        }
    }

    /// Returns the display name with its first character upper-cased, e.g. `Points`.
    pub fn capitalized_name(&self) -> String {
        let name = self.display_name();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Identity of a queue, as seen by handlers.
pub trait QueueInfo: Send + Sync {
    /// Returns the name of the queue.
    fn name(&self) -> &str;

    /// Returns the entity type carried by the queue.
    fn entity_type(&self) -> EntityType;
}

/// A queue key: an entity type paired with the handle of the pipeline the data came from.
///
/// The handle is usually the port of the listener that received the data.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct QueueKey {
    entity_type: EntityType,
    handle: String,
    name: String,
}

impl QueueKey {
    /// Creates a new `QueueKey`.
    pub fn new<H>(entity_type: EntityType, handle: H) -> Self
    where
        H: Into<String>,
    {
        let handle = handle.into();
        let name = format!("{}.{}", entity_type.display_name(), handle);
        Self {
            entity_type,
            handle,
            name,
        }
    }

    /// Returns the pipeline handle.
    pub fn handle(&self) -> &str {
        &self.handle
    }
}

impl QueueInfo for QueueKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn entity_type(&self) -> EntityType {
        self.entity_type
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_names() {
        assert_eq!(EntityType::Point.display_name(), "points");
        assert_eq!(EntityType::Point.capitalized_name(), "Points");
        assert_eq!(EntityType::TraceSpanLogs.capitalized_name(), "SpanLogs");
        assert_eq!(EntityType::DeltaCounter.capitalized_name(), "DeltaCounter");
        assert_eq!(EntityType::Histogram.rate_unit(), "dps");
        assert_eq!(EntityType::Log.rate_unit(), "logs/s");
    }

    #[test]
    fn entity_type_serde_uses_display_name() {
        let json = serde_json::to_string(&EntityType::TraceSpan).unwrap();
        assert_eq!(json, "\"spans\"");

        let parsed: EntityType = serde_json::from_str("\"sourceTags\"").unwrap();
        assert_eq!(parsed, EntityType::SourceTag);
    }

    #[test]
    fn queue_key_name() {
        let key = QueueKey::new(EntityType::Point, "2878");

        assert_eq!(key.name(), "points.2878");
        assert_eq!(key.handle(), "2878");
        assert_eq!(key.entity_type(), EntityType::Point);
        assert_eq!(key.to_string(), "points.2878");
    }
}
