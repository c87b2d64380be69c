//! Layered configuration loading.
//!
//! Configuration is assembled from a stack of sources: defaults first, then files, then environment variables, with
//! later sources taking precedence over earlier ones. The merged result can be deserialized directly into a typed
//! struct, or kept around as a [`GenericConfiguration`] and queried piecemeal by each component.
#![deny(missing_docs)]

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use figment::{
    error::Kind,
    providers::{Data, Env, Serialized, Yaml},
    Figment, Provider,
};
use relay_error::GenericError;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// A configuration file could not be read.
    #[snafu(display("Failed to read configuration file '{}'.", path.display()))]
    Io {
        /// Path of the file.
        path: PathBuf,

        /// Error source.
        source: std::io::Error,
    },

    /// A required field was not present in any source.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Hint describing every key the field can be set through.
        help_text: String,

        /// Name of the missing field.
        field: String,
    },

    /// A field was present but had the wrong type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Any other configuration failure.
    #[snafu(display("Failed to query configuration."))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> figment::Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        self.0.data()
    }
}

/// A configuration loader that pulls from multiple sources.
///
/// Sources added later take precedence over sources added earlier.
///
/// # Supported sources
///
/// - individual default values ([`add_default`][Self::add_default])
/// - YAML files ([`from_yaml`][Self::from_yaml], [`try_from_yaml`][Self::try_from_yaml])
/// - prefixed environment variables ([`from_environment`][Self::from_environment])
#[derive(Default)]
pub struct ConfigurationLoader {
    env_prefixes: HashSet<String>,
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Adds a default value for the given key.
    pub fn add_default<T>(mut self, key: &str, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.providers
            .push(BoxedProvider(Box::new(Serialized::default(key, value))));
        self
    }

    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, or is not valid YAML, an error is returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let provider = load_yaml(path.as_ref())?;
        self.providers.push(provider);
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match load_yaml(path.as_ref()) {
            Ok(provider) => self.providers.push(provider),
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().display(), "Unable to read YAML configuration file. Ignoring.");
            }
        }
        self
    }

    /// Loads configuration from environment variables starting with the given prefix.
    ///
    /// An underscore is appended to the prefix if it does not already end with one, so a prefix of `relay` matches
    /// `RELAY_BLOCKED_ITEMS_PER_BATCH`. Matching is case-insensitive, and the prefix is stripped from the resulting
    /// keys.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error is returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        // `Env` is not `Send + Sync`, so snapshot its values instead of boxing it directly.
        let values = Env::prefixed(&prefix)
            .data()
            .map_err(|e| ConfigurationError::Generic { source: e.into() })?;
        if let Some(dict) = values.get(&figment::Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(dict.clone()))));
            self.env_prefixes.insert(prefix.to_uppercase());
        }

        Ok(self)
    }

    fn merged(&self) -> Figment {
        self.providers
            .iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider))
    }

    /// Consumes the loader, deserializing the merged configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized into `T`, an error is returned.
    pub fn into_typed<'a, T>(self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let figment = self.merged();
        figment
            .extract()
            .map_err(|e| from_figment_error(&self.env_prefixes, e))
    }

    /// Consumes the loader, wrapping the merged configuration for generic querying.
    pub fn into_generic(self) -> GenericConfiguration {
        GenericConfiguration {
            inner: Arc::new(Inner {
                figment: self.merged(),
                env_prefixes: self.env_prefixes,
            }),
        }
    }
}

fn load_yaml(path: &Path) -> Result<BoxedProvider, ConfigurationError> {
    let contents = std::fs::read_to_string(path).context(Io { path })?;

    // Resolve the data eagerly so that syntax errors surface here rather than on first query.
    let mut data = Data::<Yaml>::string(&contents)
        .data()
        .map_err(|e| ConfigurationError::Generic { source: e.into() })?;
    let dict = data.remove(&figment::Profile::Default).unwrap_or_default();

    Ok(BoxedProvider(Box::new(Serialized::defaults(dict))))
}

#[derive(Debug)]
struct Inner {
    figment: Figment,
    env_prefixes: HashSet<String>,
}

/// A generic configuration object.
///
/// Values can be queried by key, where keys take the form `a.b.c` with periods marking nested values, or the whole
/// configuration can be deserialized at once with [`as_typed`][Self::as_typed].
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn get<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.inner.figment.extract_inner(key) {
            Ok(value) => Ok(value),
            Err(e) if matches!(e.kind, Kind::MissingField(_)) => {
                // Environment variables can't express nesting, so `a.b` may only exist as `a_b`.
                let fallback_key = key.replace('.', "_");
                self.inner
                    .figment
                    .extract_inner(&fallback_key)
                    .map_err(|e| from_figment_error(&self.inner.env_prefixes, e))
            }
            Err(e) => Err(from_figment_error(&self.inner.env_prefixes, e)),
        }
    }

    /// Gets a configuration value by key.
    ///
    /// # Errors
    ///
    /// If the key does not exist, or the value cannot be deserialized into `T`, an error is returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.get(key)
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// # Errors
    ///
    /// If the key exists but the value cannot be deserialized into `T`, an error is returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Gets a configuration value by key, falling back to `T::default()` if it is missing or invalid.
    pub fn get_typed_or_default<'a, T>(&self, key: &str) -> T
    where
        T: Default + Deserialize<'a>,
    {
        self.get(key).unwrap_or_default()
    }

    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized into `T`, an error is returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.inner
            .figment
            .extract()
            .map_err(|e| from_figment_error(&self.inner.env_prefixes, e))
    }
}

fn from_figment_error(env_prefixes: &HashSet<String>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let mut valid_keys = env_prefixes
                .iter()
                .map(|prefix| format!("{}{}", prefix, field.replace('.', "_").to_uppercase()))
                .collect::<Vec<_>>();
            valid_keys.sort();
            valid_keys.insert(0, field.to_string());

            ConfigurationError::MissingField {
                help_text: format!("Try setting `{}`.", valid_keys.join("` or `")),
                field: field.to_string(),
            }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}
