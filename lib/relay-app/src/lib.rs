//! Process-level bootstrapping primitives.
//!
//! Everything here is meant to run once, early, before any handlers or senders are constructed.
#![deny(missing_docs)]

pub mod logging;
