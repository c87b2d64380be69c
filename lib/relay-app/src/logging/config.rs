use relay_config::GenericConfiguration;
use relay_error::{generic_error, ErrorContext as _, GenericError};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

fn default_log_level() -> LogLevel {
    LogLevel("info".to_string())
}

const fn default_false() -> bool {
    false
}

/// Logging configuration.
#[derive(Deserialize)]
pub struct LoggingConfiguration {
    /// Log filtering directives, in `tracing_subscriber::EnvFilter` syntax.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to emit logs as JSON instead of plain text.
    ///
    /// Defaults to `false`.
    #[serde(default = "default_false")]
    pub log_format_json: bool,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: default_false(),
        }
    }
}

/// Validated log filtering directives.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel(String);

impl LogLevel {
    /// Builds the filter described by these directives.
    pub fn as_env_filter(&self) -> EnvFilter {
        // Directives were validated on construction, so lossy parsing never drops anything here.
        EnvFilter::builder().parse_lossy(&self.0)
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(&value)
            .error_context("Failed to parse valid log level.")?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use relay_config::ConfigurationLoader;

    use super::*;

    #[test]
    fn defaults() {
        let config = ConfigurationLoader::default().into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).expect("defaults should apply");

        assert_eq!(logging.log_level.0, "info");
        assert!(!logging.log_format_json);
    }

    #[test]
    fn directives_from_configuration() {
        let config = ConfigurationLoader::default()
            .add_default("log_level", "relay_core=debug,warn")
            .add_default("log_format_json", true)
            .into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).expect("should deserialize");

        assert_eq!(logging.log_level.0, "relay_core=debug,warn");
        assert!(logging.log_format_json);
    }

    #[test]
    fn invalid_directives_rejected() {
        assert!(LogLevel::try_from(String::new()).is_err());
        assert!(LogLevel::try_from("relay_core=loud".to_string()).is_err());
        assert!(LogLevel::try_from("debug".to_string()).is_ok());
    }
}
