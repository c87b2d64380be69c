//! Submission batches.
//!
//! A submission batch is a run of already-serialized payload lines bound for the remote collector. The sender drains
//! batches from a queue and [executes][SubmissionBatch::execute] them. When delivery fails in a way that calls for
//! smaller payloads, the batch is [split][SubmissionBatch::split] and the children are queued in its place.

use std::sync::Arc;

use http::StatusCode;
use relay_error::GenericError;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tracing::debug;

mod context;
pub use self::context::{
    EntityProperties, ProxyApi, SenderStats, SubmissionContext, SystemTimeProvider, TimeProvider,
};

/// The response to a submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmitResponse {
    /// Response status.
    pub status: StatusCode,

    /// Response body.
    pub body: String,
}

impl SubmitResponse {
    /// Creates a new `SubmitResponse`.
    pub fn new<B: Into<String>>(status: StatusCode, body: B) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` if the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A transport error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TransportError {
    /// The request could not be sent.
    #[snafu(display("Failed to send request: {}", message))]
    Request {
        /// Error description.
        message: String,
    },

    /// The request timed out.
    #[snafu(display("Request timed out."))]
    Timeout,

    /// Any other transport failure.
    #[snafu(display("Transport failure: {}", source))]
    Other {
        /// Underlying error.
        source: GenericError,
    },
}

/// A batch record error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum BatchRecordError {
    /// The record was written for a different format than the context it is being restored into.
    #[snafu(display("Batch record format '{}' does not match destination format '{}'.", actual, expected))]
    FormatMismatch {
        /// Format of the destination context.
        expected: String,

        /// Format stored in the record.
        actual: String,
    },
}

/// The persisted form of a batch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchRecord {
    /// Destination format.
    pub format: String,

    /// Payload lines.
    pub payload: Vec<String>,
}

/// A batch of serialized lines bound for a single destination.
///
/// Batches split from one another share the same [`SubmissionContext`], while each owns its own payload lines.
#[derive(Clone, Debug)]
pub struct SubmissionBatch {
    context: Arc<SubmissionContext>,
    payload: Vec<String>,
    enqueued_at_millis: u64,
}

impl SubmissionBatch {
    /// Creates a new `SubmissionBatch` from the given payload lines, stamped with the current time.
    pub fn new<I, S>(context: Arc<SubmissionContext>, payload: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let enqueued_at_millis = context.time_provider().now_millis();
        Self {
            context,
            payload: payload.into_iter().map(Into::into).collect(),
            enqueued_at_millis,
        }
    }

    /// Restores a batch from its persisted form.
    ///
    /// The batch is stamped with the current time.
    ///
    /// # Errors
    ///
    /// If the record's format does not match the context's format, an error is returned.
    pub fn from_record(context: Arc<SubmissionContext>, record: BatchRecord) -> Result<Self, BatchRecordError> {
        if record.format != context.format() {
            return Err(BatchRecordError::FormatMismatch {
                expected: context.format().to_string(),
                actual: record.format,
            });
        }

        Ok(Self::new(context, record.payload))
    }

    /// Returns the persisted form of this batch.
    pub fn to_record(&self) -> BatchRecord {
        BatchRecord {
            format: self.context.format().to_string(),
            payload: self.payload.clone(),
        }
    }

    /// Returns the shared submission context.
    pub fn context(&self) -> &Arc<SubmissionContext> {
        &self.context
    }

    /// Returns the payload lines.
    pub fn payload(&self) -> &[String] {
        &self.payload
    }

    /// Returns the time the batch was created, in milliseconds since the Unix epoch.
    pub fn enqueued_at_millis(&self) -> u64 {
        self.enqueued_at_millis
    }

    /// Returns the number of payload lines.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Returns the size of the joined payload, in bytes.
    pub fn size_bytes(&self) -> usize {
        let delimiters = self.payload.len().saturating_sub(1);
        self.payload.iter().map(String::len).sum::<usize>() + delimiters
    }

    /// Submits the batch to the destination API.
    ///
    /// Exactly one attempt is made. Retrying, and deciding whether to split first, is up to the caller.
    ///
    /// # Errors
    ///
    /// If the submission fails at the transport level, the error is returned as-is.
    pub async fn execute(&self) -> Result<SubmitResponse, TransportError> {
        debug!(
            queue = self.context.queue().name(),
            format = self.context.format(),
            lines = self.size(),
            "Submitting batch."
        );

        self.context
            .api()
            .proxy_report(
                self.context.proxy_id(),
                self.context.format(),
                join_push_data(&self.payload),
            )
            .await
    }

    /// Splits the batch into smaller batches.
    ///
    /// Batches of at most `max(1, min_split_size)` lines are considered minimal and are returned unchanged, as the only
    /// element. Otherwise, the payload is cut into consecutive runs of `min(max_split_size, ceil(size / 2))` lines
    /// (the last run may be shorter), preserving order. Children share this batch's context and creation time.
    pub fn split(self, min_split_size: usize, max_split_size: usize) -> Vec<SubmissionBatch> {
        let size = self.size();
        if size <= min_split_size.max(1) {
            return vec![self];
        }

        let stride = max_split_size.min(size.div_ceil(2)).max(1);
        let mut children = Vec::with_capacity(size.div_ceil(stride));
        let mut lines = self.payload.into_iter();
        loop {
            let payload = lines.by_ref().take(stride).collect::<Vec<_>>();
            if payload.is_empty() {
                break;
            }

            children.push(SubmissionBatch {
                context: Arc::clone(&self.context),
                payload,
                enqueued_at_millis: self.enqueued_at_millis,
            });
        }

        children
    }

    /// Splits the batch using the entity's configured batching properties.
    pub fn split_for_retry(self) -> Vec<SubmissionBatch> {
        let properties = self.context.properties();
        let (min_split_size, max_split_size) = (properties.min_batch_split_size(), properties.items_per_batch());
        self.split(min_split_size, max_split_size)
    }
}

/// Joins payload lines into a single newline-delimited payload.
pub fn join_push_data<S: AsRef<str>>(lines: &[S]) -> String {
    let mut joined = String::with_capacity(lines.iter().map(|line| line.as_ref().len() + 1).sum());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            joined.push('\n');
        }
        joined.push_str(line.as_ref());
    }
    joined
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use proptest::prelude::*;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::BatchConfiguration,
        queue::{EntityType, QueueKey},
    };

    #[derive(Default)]
    struct MockApi {
        calls: Mutex<Vec<(Uuid, String, String)>>,
        fail: bool,
    }

    impl MockApi {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(Uuid, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProxyApi for MockApi {
        async fn proxy_report(
            &self, proxy_id: Uuid, format: &str, payload: String,
        ) -> Result<SubmitResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((proxy_id, format.to_string(), payload));
            if self.fail {
                Err(TransportError::Timeout)
            } else {
                Ok(SubmitResponse::new(StatusCode::ACCEPTED, ""))
            }
        }
    }

    struct FixedClock(u64);

    impl TimeProvider for FixedClock {
        fn now_millis(&self) -> u64 {
            self.0
        }
    }

    #[derive(Default)]
    struct CountingStats(AtomicU64);

    impl SenderStats for CountingStats {
        fn record_delivered(&self, items: u64) {
            self.0.fetch_add(items, Ordering::Relaxed);
        }

        fn record_failed(&self, _: u64) {}
    }

    fn context_with_api(api: Arc<MockApi>, properties: BatchConfiguration) -> Arc<SubmissionContext> {
        let queue = Arc::new(QueueKey::new(EntityType::Point, "2878"));
        Arc::new(
            SubmissionContext::new(api, Uuid::nil(), "wavefront", queue, Arc::new(properties))
                .with_time_provider(Arc::new(FixedClock(1_700_000_000_000))),
        )
    }

    fn context() -> Arc<SubmissionContext> {
        context_with_api(Arc::new(MockApi::default()), BatchConfiguration::default())
    }

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("metric.{} {} source=host", i, i)).collect()
    }

    fn payloads(batches: &[SubmissionBatch]) -> Vec<Vec<String>> {
        batches.iter().map(|batch| batch.payload().to_vec()).collect()
    }

    #[test]
    fn size_counts_lines() {
        let batch = SubmissionBatch::new(context(), ["a 1", "bb 2", "ccc 3"]);
        assert_eq!(batch.size(), 3);
        assert_eq!(batch.size_bytes(), "a 1\nbb 2\nccc 3".len());
        assert_eq!(batch.enqueued_at_millis(), 1_700_000_000_000);

        let empty = SubmissionBatch::new(context(), Vec::<String>::new());
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.size_bytes(), 0);
    }

    #[test]
    fn split_halves_capped_by_max() {
        let batch = SubmissionBatch::new(context(), lines(10));
        let children = batch.split(0, 4);

        let sizes = children.iter().map(SubmissionBatch::size).collect::<Vec<_>>();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(payloads(&children).concat(), lines(10));
    }

    #[test]
    fn split_halves_when_max_is_large() {
        let children = SubmissionBatch::new(context(), lines(7)).split(0, 100);

        let sizes = children.iter().map(SubmissionBatch::size).collect::<Vec<_>>();
        assert_eq!(sizes, vec![4, 3]);
    }

    #[test]
    fn split_refused_at_min_size() {
        let batch = SubmissionBatch::new(context(), lines(5));
        let children = batch.split(5, 2);

        assert_eq!(children.len(), 1);
        assert_eq!(children[0].payload(), lines(5).as_slice());
    }

    #[test]
    fn split_refused_for_single_line() {
        let children = SubmissionBatch::new(context(), lines(1)).split(0, 0);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].size(), 1);
    }

    #[test]
    fn split_with_zero_max_uses_single_line_stride() {
        let children = SubmissionBatch::new(context(), lines(3)).split(0, 0);
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|child| child.size() == 1));
    }

    #[test]
    fn children_share_context() {
        let batch = SubmissionBatch::new(context(), lines(10));
        let parent_context = Arc::clone(batch.context());
        let enqueued_at = batch.enqueued_at_millis();

        for child in batch.split(0, 3) {
            assert!(Arc::ptr_eq(child.context(), &parent_context));
            assert_eq!(child.enqueued_at_millis(), enqueued_at);
        }
    }

    #[test]
    fn split_for_retry_uses_properties() {
        let ctx = context_with_api(Arc::new(MockApi::default()), BatchConfiguration::new(3, 2));
        let children = SubmissionBatch::new(ctx, lines(8)).split_for_retry();

        let sizes = children.iter().map(SubmissionBatch::size).collect::<Vec<_>>();
        assert_eq!(sizes, vec![3, 3, 2]);
    }

    #[tokio::test]
    async fn execute_makes_one_call_with_joined_payload() {
        let api = Arc::new(MockApi::default());
        let batch = SubmissionBatch::new(context_with_api(api.clone(), BatchConfiguration::default()), lines(3));

        let response = assert_ok!(batch.execute().await);
        assert!(response.is_success());

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Uuid::nil());
        assert_eq!(calls[0].1, "wavefront");
        assert_eq!(calls[0].2, lines(3).join("\n"));
    }

    #[tokio::test]
    async fn execute_surfaces_transport_errors() {
        let api = Arc::new(MockApi::failing());
        let batch = SubmissionBatch::new(context_with_api(api.clone(), BatchConfiguration::default()), lines(2));

        let error = assert_err!(batch.execute().await);
        assert!(matches!(error, TransportError::Timeout));
        assert_eq!(api.calls().len(), 1);
    }

    #[test]
    fn context_carries_sender_stats() {
        let stats = Arc::new(CountingStats::default());
        let queue = Arc::new(QueueKey::new(EntityType::TraceSpan, "30001"));
        let ctx = SubmissionContext::new(
            Arc::new(MockApi::default()),
            Uuid::nil(),
            "trace",
            queue,
            Arc::new(BatchConfiguration::default()),
        )
        .with_sender_stats(stats.clone());

        ctx.sender_stats().unwrap().record_delivered(4);
        assert_eq!(stats.0.load(Ordering::Relaxed), 4);
        assert_eq!(ctx.queue().name(), "spans.30001");
    }

    #[test]
    fn record_restores_batch() {
        let batch = SubmissionBatch::new(context(), lines(4));
        let encoded = serde_json::to_string(&batch.to_record()).unwrap();
        let record: BatchRecord = serde_json::from_str(&encoded).unwrap();

        let restored = SubmissionBatch::from_record(context(), record).unwrap();
        assert_eq!(restored.payload(), batch.payload());
    }

    #[test]
    fn record_with_other_format_is_refused() {
        let record = BatchRecord {
            format: "histogram".to_string(),
            payload: lines(1),
        };

        let error = SubmissionBatch::from_record(context(), record).unwrap_err();
        assert!(matches!(error, BatchRecordError::FormatMismatch { .. }));
    }

    #[test]
    fn join_push_data_delimits_with_newlines() {
        assert_eq!(join_push_data::<&str>(&[]), "");
        assert_eq!(join_push_data(&["a"]), "a");
        assert_eq!(join_push_data(&["a", "b", "c"]), "a\nb\nc");
    }

    proptest! {
        #[test]
        fn property_split_is_lossless(n in 0usize..500, min in 0usize..50, max in 0usize..200) {
            let payload = lines(n);
            let children = SubmissionBatch::new(context(), payload.clone()).split(min, max);

            prop_assert_eq!(payloads(&children).concat(), payload);

            if n <= min.max(1) {
                prop_assert_eq!(children.len(), 1);
            } else {
                let stride = max.min(n.div_ceil(2)).max(1);
                prop_assert_eq!(children.len(), n.div_ceil(stride));
                prop_assert!(children.iter().all(|child| child.size() <= stride && child.size() > 0));
            }
        }
    }
}
