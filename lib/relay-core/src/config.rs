//! Handler and batching configuration.

use std::time::Duration;

use relay_config::GenericConfiguration;
use relay_error::GenericError;
use serde::Deserialize;

use crate::submission::EntityProperties;

const fn default_blocked_items_per_batch() -> u32 {
    5
}

const fn default_true() -> bool {
    true
}

const fn default_stats_interval_secs() -> u64 {
    10
}

const fn default_totals_interval_secs() -> u64 {
    60
}

const fn default_no_data_stats_interval_secs() -> u64 {
    60
}

const fn default_items_per_batch() -> usize {
    40_000
}

const fn default_min_batch_split_size() -> usize {
    100
}

/// Entity handler configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct HandlerConfiguration {
    /// Budget for summary log lines about blocked items.
    ///
    /// Summary lines are emitted at a rate of one tenth of this value per second. A value of zero disables summary
    /// lines entirely.
    ///
    /// Defaults to 5.
    #[serde(default = "default_blocked_items_per_batch")]
    blocked_items_per_batch: u32,

    /// Whether received and blocked counts are exported, and whether rate and total lines are logged.
    ///
    /// When disabled, the received and blocked counters are still maintained, but in a private registry.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    report_received_stats: bool,

    /// Interval between received-rate log lines, in seconds.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_stats_interval_secs")]
    stats_interval_secs: u64,

    /// Interval between cumulative total log lines, in seconds.
    ///
    /// Defaults to 60 seconds.
    #[serde(default = "default_totals_interval_secs")]
    totals_interval_secs: u64,

    /// Minimum interval between received-rate log lines while a queue sees no traffic, in seconds.
    ///
    /// Defaults to 60 seconds.
    #[serde(default = "default_no_data_stats_interval_secs")]
    no_data_stats_interval_secs: u64,
}

impl HandlerConfiguration {
    /// Creates a new `HandlerConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Sets the blocked items budget.
    pub fn with_blocked_items_per_batch(mut self, blocked_items_per_batch: u32) -> Self {
        self.blocked_items_per_batch = blocked_items_per_batch;
        self
    }

    /// Sets whether received stats are reported.
    pub fn with_report_received_stats(mut self, report_received_stats: bool) -> Self {
        self.report_received_stats = report_received_stats;
        self
    }

    /// Returns the blocked items budget.
    pub const fn blocked_items_per_batch(&self) -> u32 {
        self.blocked_items_per_batch
    }

    /// Returns the summary log rate derived from the blocked items budget, in lines per second.
    ///
    /// Returns `None` when summary logging is disabled.
    pub fn blocked_items_log_rate(&self) -> Option<f64> {
        (self.blocked_items_per_batch > 0).then(|| f64::from(self.blocked_items_per_batch) / 10.0)
    }

    /// Returns `true` if received stats are reported.
    pub const fn report_received_stats(&self) -> bool {
        self.report_received_stats
    }

    /// Returns the interval between received-rate log lines.
    pub const fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Returns the interval between cumulative total log lines.
    pub const fn totals_interval(&self) -> Duration {
        Duration::from_secs(self.totals_interval_secs)
    }

    /// Returns the minimum interval between received-rate log lines for idle queues.
    pub const fn no_data_stats_interval(&self) -> Duration {
        Duration::from_secs(self.no_data_stats_interval_secs)
    }
}

impl Default for HandlerConfiguration {
    fn default() -> Self {
        Self {
            blocked_items_per_batch: default_blocked_items_per_batch(),
            report_received_stats: default_true(),
            stats_interval_secs: default_stats_interval_secs(),
            totals_interval_secs: default_totals_interval_secs(),
            no_data_stats_interval_secs: default_no_data_stats_interval_secs(),
        }
    }
}

/// Batching configuration for a single entity type.
#[derive(Clone, Debug, Deserialize)]
pub struct BatchConfiguration {
    /// Maximum number of items in a single batch.
    ///
    /// Defaults to 40,000.
    #[serde(default = "default_items_per_batch")]
    items_per_batch: usize,

    /// Batches at or below this size are never split further.
    ///
    /// Defaults to 100.
    #[serde(default = "default_min_batch_split_size")]
    min_batch_split_size: usize,
}

impl BatchConfiguration {
    /// Creates a new `BatchConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Creates a new `BatchConfiguration` with explicit limits.
    pub const fn new(items_per_batch: usize, min_batch_split_size: usize) -> Self {
        Self {
            items_per_batch,
            min_batch_split_size,
        }
    }
}

impl Default for BatchConfiguration {
    fn default() -> Self {
        Self::new(default_items_per_batch(), default_min_batch_split_size())
    }
}

impl EntityProperties for BatchConfiguration {
    fn items_per_batch(&self) -> usize {
        self.items_per_batch
    }

    fn min_batch_split_size(&self) -> usize {
        self.min_batch_split_size
    }
}
