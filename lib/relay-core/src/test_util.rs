//! Testing-related helpers.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use tracing::{
    field::{Field, Visit},
    subscriber::DefaultGuard,
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer};

/// A single captured log event.
#[derive(Clone, Debug)]
pub struct CapturedLine {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push((field.name().to_string(), format!("{:?}", value)));
        }
    }
}

/// A layer that stores every event it sees, for asserting on log output in tests.
///
/// The subscriber is installed as the thread-local default, so it captures events from tasks spawned on a
/// current-thread runtime as well.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    lines: Arc<Mutex<Vec<CapturedLine>>>,
}

impl CapturedLogs {
    /// Installs a subscriber with this layer as the thread-local default.
    pub fn set_default(&self) -> DefaultGuard {
        tracing_subscriber::registry().with(self.clone()).set_default()
    }

    /// Returns every captured line.
    pub fn lines(&self) -> Vec<CapturedLine> {
        self.lines.lock().unwrap().clone()
    }

    /// Returns the messages of every captured line containing `needle`.
    pub fn containing(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.message.contains(needle))
            .map(|line| line.message)
            .collect()
    }

    /// Returns the number of captured lines containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.containing(needle).len()
    }

    /// Returns every captured line at the given level.
    pub fn at_level(&self, level: Level) -> Vec<CapturedLine> {
        self.lines().into_iter().filter(|line| line.level == level).collect()
    }
}

impl<S> Layer<S> for CapturedLogs
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        self.lines.lock().unwrap().push(CapturedLine {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}
