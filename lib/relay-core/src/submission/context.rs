use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{SubmitResponse, TransportError};
use crate::queue::QueueInfo;

/// The remote collector API that batches are submitted to.
#[async_trait]
pub trait ProxyApi: Send + Sync {
    /// Submits a newline-delimited payload in the given format on behalf of the given proxy.
    ///
    /// Implementations make a single attempt and do not retry.
    async fn proxy_report(&self, proxy_id: Uuid, format: &str, payload: String)
        -> Result<SubmitResponse, TransportError>;
}

/// Batching properties of an entity type.
pub trait EntityProperties: Send + Sync {
    /// Returns the maximum number of items in a single batch.
    fn items_per_batch(&self) -> usize;

    /// Returns the size at or below which batches are not split further.
    fn min_batch_split_size(&self) -> usize;
}

/// A source of wall-clock timestamps.
pub trait TimeProvider: Send + Sync {
    /// Returns the current time, in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// A [`TimeProvider`] backed by the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Delivery statistics maintained by the sender driving batch submission.
pub trait SenderStats: Send + Sync {
    /// Records items that were delivered.
    fn record_delivered(&self, items: u64);

    /// Records items whose delivery failed.
    fn record_failed(&self, items: u64);
}

/// Context shared by a batch and every batch split from it.
///
/// The context is read-only once built; batches hold it behind an `Arc` and never mutate it.
pub struct SubmissionContext {
    api: Arc<dyn ProxyApi>,
    proxy_id: Uuid,
    format: String,
    queue: Arc<dyn QueueInfo>,
    properties: Arc<dyn EntityProperties>,
    time_provider: Arc<dyn TimeProvider>,
    sender_stats: Option<Arc<dyn SenderStats>>,
}

impl SubmissionContext {
    /// Creates a new `SubmissionContext`.
    ///
    /// Timestamps are taken from the system clock unless overridden with
    /// [`with_time_provider`][Self::with_time_provider].
    pub fn new<F>(
        api: Arc<dyn ProxyApi>, proxy_id: Uuid, format: F, queue: Arc<dyn QueueInfo>,
        properties: Arc<dyn EntityProperties>,
    ) -> Self
    where
        F: Into<String>,
    {
        Self {
            api,
            proxy_id,
            format: format.into(),
            queue,
            properties,
            time_provider: Arc::new(SystemTimeProvider),
            sender_stats: None,
        }
    }

    /// Sets the time provider.
    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Sets the sender statistics sink.
    pub fn with_sender_stats(mut self, sender_stats: Arc<dyn SenderStats>) -> Self {
        self.sender_stats = Some(sender_stats);
        self
    }

    /// Returns the destination API.
    pub fn api(&self) -> &dyn ProxyApi {
        self.api.as_ref()
    }

    /// Returns the proxy identity.
    pub fn proxy_id(&self) -> Uuid {
        self.proxy_id
    }

    /// Returns the destination format.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Returns the queue the batch was drained from.
    pub fn queue(&self) -> &dyn QueueInfo {
        self.queue.as_ref()
    }

    /// Returns the entity batching properties.
    pub fn properties(&self) -> &dyn EntityProperties {
        self.properties.as_ref()
    }

    /// Returns the time provider.
    pub fn time_provider(&self) -> &dyn TimeProvider {
        self.time_provider.as_ref()
    }

    /// Returns the sender statistics sink, if one was set.
    pub fn sender_stats(&self) -> Option<&Arc<dyn SenderStats>> {
        self.sender_stats.as_ref()
    }
}

impl fmt::Debug for SubmissionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionContext")
            .field("proxy_id", &self.proxy_id)
            .field("format", &self.format)
            .field("queue", &self.queue.name())
            .finish_non_exhaustive()
    }
}
