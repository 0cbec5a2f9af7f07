//! Data access configuration loaded with Figment.
//!
//! Sources, highest precedence first:
//! 1. Environment variables prefixed `REPOKIT_` (`__` separates nested keys,
//!    e.g. `REPOKIT_CONNECTION_STRINGS__DEFAULT=file:app.db`)
//! 2. `./repokit.toml` (or the file given to [`DataConfig::load_from`])
//! 3. Defaults

use std::collections::HashMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "repokit.toml";
pub const ENV_PREFIX: &str = "REPOKIT_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration")]
    Figment(#[from] Box<figment::Error>),
    #[error("no connection string named `{0}`")]
    MissingConnectionString(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Figment(Box::new(e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Named connection strings, e.g. `default = "file:app.db"`.
    pub connection_strings: HashMap<String, String>,
    /// Attach statement text to backend errors.
    pub detailed_errors: bool,
    /// Include parameter values in statement logs.
    pub sensitive_data_logging: bool,
    /// Log each executed statement at debug level.
    pub log_statements: bool,
    pub busy_timeout_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            connection_strings: HashMap::new(),
            detailed_errors: false,
            sensitive_data_logging: false,
            log_statements: true,
            busy_timeout_ms: 1000,
        }
    }
}

impl DataConfig {
    /// Load from `./repokit.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file (missing files are ignored) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading data configuration");
        let config = Figment::new()
            .merge(Serialized::defaults(DataConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Case-insensitive lookup of a named connection string.
    pub fn connection_string(&self, name: &str) -> Result<&str, ConfigError> {
        self.connection_strings
            .get(name)
            .or_else(|| {
                self.connection_strings
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingConnectionString(name.to_owned()))
    }

    pub fn with_connection_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection_strings.insert(name.into(), value.into());
        self
    }
}
