//! Logging.

use relay_error::GenericError;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, registry::LookupSpan, util::SubscriberInitExt as _, Layer};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

/// Initializes the global `tracing` subscriber.
///
/// Logs are written to standard output, either as plain text or as flattened JSON objects depending on
/// [`LoggingConfiguration::log_format_json`], and filtered by [`LoggingConfiguration::log_level`].
///
/// # Errors
///
/// If a global subscriber was already installed, an error is returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), GenericError> {
    let filter = config.log_level.as_env_filter();

    tracing_subscriber::registry()
        .with(build_formatting_layer(config).with_filter(filter))
        .try_init()?;

    Ok(())
}

fn build_formatting_layer<S>(config: &LoggingConfiguration) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if config.log_format_json {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    }
}
