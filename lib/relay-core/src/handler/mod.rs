//! Entity handlers.
//!
//! An entity handler is the entry point for a single kind of telemetry data on a single pipeline. It hands accepted
//! items to an entity-specific [`ReportEntity`] strategy and keeps count of everything that passes through: received,
//! sent, blocked, and rejected items. Blocked and rejected items are written verbatim to an optional
//! [`BlockedItemsLog`], while a rate-limited summary line goes to the main log.

use std::{marker::PhantomData, sync::Arc};

use relay_error::GenericError;
use snafu::Snafu;
use tracing::{debug, error, info};

use crate::{config::HandlerConfiguration, limiter::RateLimiter, queue::QueueInfo};

mod blocked;
pub use self::blocked::{BlockedItemsLog, TracingBlockedItemsLog};

mod reporter;
use self::reporter::{Reporter, ReporterGuard};

mod stats;
pub use self::stats::{HandlerRegistries, HandlerStats};

/// An error raised while handling a single item.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ReportError {
    /// The item failed validation.
    ///
    /// The item is rejected and counted.
    #[snafu(display("{}", message))]
    Validation {
        /// Human-readable reason for the rejection.
        message: String,
    },

    /// An unexpected failure while handling the item.
    ///
    /// The item is dropped and logged, but not counted.
    #[snafu(display("Failed to handle item: {}", source))]
    Internal {
        /// Underlying error.
        source: GenericError,
    },
}

impl ReportError {
    /// Creates a validation error with the given message.
    pub fn validation<M: Into<String>>(message: M) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an internal error wrapping `source`.
    pub fn internal<E: Into<GenericError>>(source: E) -> Self {
        Self::Internal { source: source.into() }
    }
}

/// Entity-specific handling logic.
pub trait ReportEntity<T>: Send + Sync {
    /// Handles a single item.
    ///
    /// Implementations are expected to record accepted items against `stats`.
    ///
    /// # Errors
    ///
    /// If the item is invalid, [`ReportError::Validation`] is returned and the item is rejected. Any other failure is
    /// returned as [`ReportError::Internal`].
    fn report_internal(&self, item: &T, stats: &HandlerStats) -> Result<(), ReportError>;

    /// Serializes an item into its wire form, for logging.
    fn serialize(&self, item: &T) -> String;
}

/// A handler for items of type `T`.
///
/// Handlers are safe to share between threads: every operation takes `&self`. Periodic reporting tasks are started
/// on construction and run until [`shutdown`][Self::shutdown] is called or the handler is dropped.
pub struct EntityHandler<T, R> {
    name: String,
    queue: Arc<dyn QueueInfo>,
    strategy: R,
    stats: Arc<HandlerStats>,
    blocked_items_limiter: Option<RateLimiter>,
    blocked_items_log: Option<Arc<dyn BlockedItemsLog>>,
    reporter: ReporterGuard,
    _item: PhantomData<fn(&T)>,
}

impl<T, R> EntityHandler<T, R>
where
    R: ReportEntity<T>,
{
    /// Creates a new `EntityHandler`.
    ///
    /// Metrics are registered under the `<name>.<queue name>` prefix. Received and blocked counts, along with the
    /// maximum burst rate gauge, go to the exported registry if received stats are reported, and to the private
    /// registry otherwise. Sent and rejected counts always go to the exported registry.
    ///
    /// Must be called from within a Tokio runtime, as the periodic reporting tasks are spawned immediately.
    ///
    /// # Errors
    ///
    /// If a rate limiter cannot be built from the configured intervals, an error is returned.
    pub fn new<N>(
        name: N, queue: Arc<dyn QueueInfo>, config: &HandlerConfiguration, strategy: R, registries: &HandlerRegistries,
    ) -> Result<Self, GenericError>
    where
        N: Into<String>,
    {
        let name = name.into();
        let stats = Arc::new(HandlerStats::register(
            &name,
            queue.as_ref(),
            registries,
            config.report_received_stats(),
        ));

        let blocked_items_limiter = config.blocked_items_log_rate().map(RateLimiter::new).transpose()?;

        let reporter = Reporter::new(name.clone(), queue.entity_type(), Arc::clone(&stats), config)?;
        let reporter = ReporterGuard::spawn(reporter, config);

        debug!(handler = %name, queue = queue.name(), "Entity handler started.");

        Ok(Self {
            name,
            queue,
            strategy,
            stats,
            blocked_items_limiter,
            blocked_items_log: None,
            reporter,
            _item: PhantomData,
        })
    }

    /// Sets the log that blocked and rejected items are written to.
    pub fn with_blocked_items_log(mut self, log: Arc<dyn BlockedItemsLog>) -> Self {
        self.blocked_items_log = Some(log);
        self
    }

    /// Returns the name of the handler.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the queue this handler feeds.
    pub fn queue(&self) -> &dyn QueueInfo {
        self.queue.as_ref()
    }

    /// Returns the handler statistics.
    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    /// Handles a single item.
    ///
    /// Items failing validation are rejected, with the serialized item appended to the rejection message. Items
    /// failing for any other reason are logged at error level and dropped without being counted as blocked or
    /// rejected.
    pub fn report(&self, item: &T) {
        match self.strategy.report_internal(item, &self.stats) {
            Ok(()) => {}
            Err(ReportError::Validation { message }) => {
                let message = format!("{} ({})", message, self.strategy.serialize(item));
                self.reject(Some(item), Some(&message));
            }
            Err(ReportError::Internal { source }) => {
                error!(
                    handler = %self.name,
                    error = ?source,
                    "Uncaught error when handling input ({}).",
                    self.strategy.serialize(item)
                );
            }
        }
    }

    /// Blocks an item that was filtered out on purpose.
    pub fn block(&self, item: &T) {
        self.stats.record_blocked();
        if let Some(log) = &self.blocked_items_log {
            log.info(&self.strategy.serialize(item));
        }
    }

    /// Blocks an item, with an optional explanation.
    ///
    /// Both the item and the explanation only go to the blocked items log, and are never rate limited.
    pub fn block_with_message(&self, item: Option<&T>, message: Option<&str>) {
        self.stats.record_blocked();
        if let Some(log) = &self.blocked_items_log {
            if let Some(item) = item {
                log.info(&self.strategy.serialize(item));
            }
            if let Some(message) = message {
                log.info(message);
            }
        }
    }

    /// Rejects an invalid item, with an optional explanation.
    ///
    /// Rejected items count as both blocked and rejected.
    pub fn reject(&self, item: Option<&T>, message: Option<&str>) {
        self.stats.record_rejected();
        if let (Some(log), Some(item)) = (&self.blocked_items_log, item) {
            log.warn(&self.strategy.serialize(item));
        }
        self.log_blocked_summary(message);
    }

    /// Rejects a raw input line that could not be decoded into an item.
    pub fn reject_line(&self, line: &str, message: Option<&str>) {
        self.stats.record_rejected();
        if let Some(log) = &self.blocked_items_log {
            log.warn(line);
        }
        self.log_blocked_summary(message);
    }

    /// Stops the periodic reporting tasks.
    ///
    /// Counters remain readable afterwards. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if !self.reporter.is_stopped() {
            debug!(handler = %self.name, queue = self.queue.name(), "Entity handler stopping.");
        }
        self.reporter.stop();
    }

    fn log_blocked_summary(&self, message: Option<&str>) {
        let Some(message) = message.filter(|message| !message.is_empty()) else {
            return;
        };

        if let Some(limiter) = &self.blocked_items_limiter {
            if limiter.try_acquire() {
                info!("[{}] blocked input: [{}]", self.name, message);
            }
        }
    }
}
