use tracing::{info, warn};

/// A sink for the verbatim bodies of blocked and rejected items.
///
/// This is separate from the main log: every blocked or rejected item is written here, without any rate limiting, so
/// it is expected to be routed somewhere the operator can size and rotate independently.
pub trait BlockedItemsLog: Send + Sync {
    /// Records the body of a blocked item, or a message about it.
    fn info(&self, line: &str);

    /// Records the body of a rejected item.
    fn warn(&self, line: &str);
}

/// A [`BlockedItemsLog`] that writes to the `relay_core::blocked_items` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingBlockedItemsLog;

impl BlockedItemsLog for TracingBlockedItemsLog {
    fn info(&self, line: &str) {
        info!(target: "relay_core::blocked_items", "{}", line);
    }

    fn warn(&self, line: &str) {
        warn!(target: "relay_core::blocked_items", "{}", line);
    }
}
