//! Ingestion and egress core of the telemetry relay.
//!
//! Items enter through an [`EntityHandler`][handler::EntityHandler], which accounts for everything it sees, and leave as
//! [`SubmissionBatch`][submission::SubmissionBatch]es submitted to the remote collector.
#![deny(missing_docs)]

pub mod config;
pub mod handler;
pub mod limiter;
pub mod queue;
pub mod submission;

#[cfg(test)]
mod test_util;
