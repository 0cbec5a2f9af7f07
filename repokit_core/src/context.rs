//! Backend-neutral context options and the context adaptor.

use std::time::Duration;

use crate::config::{ConfigError, DataConfig};
use crate::transactions::UnitOfWork;

/// Options a backend needs to open a database context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub connection_string: String,
    pub detailed_errors: bool,
    pub sensitive_data_logging: bool,
    pub log_statements: bool,
    pub busy_timeout: Duration,
    /// Set when the context targets a named in-memory database.
    pub database_name: Option<String>,
}

impl ContextOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self::with_config(connection_string.into(), &DataConfig::default())
    }

    /// Bind the connection string called `name` together with the global switches.
    pub fn from_config(config: &DataConfig, name: &str) -> Result<Self, ConfigError> {
        let connection_string = config.connection_string(name)?.to_owned();
        Ok(Self::with_config(connection_string, config))
    }

    /// A named, shared in-memory database. Contexts opened with the same name
    /// see the same data for as long as one of them stays open.
    pub fn in_memory(database_name: &str) -> Self {
        let mut opts = Self::new(format!("file:{database_name}?mode=memory&cache=shared"));
        opts.database_name = Some(database_name.to_owned());
        opts
    }

    /// Like [`ContextOptions::from_config`] but targets a named in-memory database
    /// when `database_name` is given; the connection string is then not required.
    pub fn from_config_or_memory(
        config: &DataConfig,
        name: &str,
        database_name: Option<&str>,
    ) -> Result<Self, ConfigError> {
        match database_name {
            Some(db) => {
                let mut opts = Self::with_config(String::new(), config);
                let mem = Self::in_memory(db);
                opts.connection_string = mem.connection_string;
                opts.database_name = mem.database_name;
                Ok(opts)
            }
            None => Self::from_config(config, name),
        }
    }

    fn with_config(connection_string: String, config: &DataConfig) -> Self {
        Self {
            connection_string,
            detailed_errors: config.detailed_errors,
            sensitive_data_logging: config.sensitive_data_logging,
            log_statements: config.log_statements,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            database_name: None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_name.is_some()
    }
}

/// An opened database context able to hand out units of work.
#[async_trait::async_trait]
pub trait DbContext: Send + Sync {
    type UnitOfWork: UnitOfWork;

    fn options(&self) -> &ContextOptions;

    /// A fresh unit of work with an open transaction.
    async fn unit_of_work(&self) -> crate::RepoResult<Self::UnitOfWork>;
}

/// Owns an optional context for the lifetime of a scope.
///
/// Dropping the adaptor drops the context it holds.
#[derive(Debug)]
pub struct ContextAdaptor<C> {
    context: Option<C>,
}

impl<C> ContextAdaptor<C> {
    pub fn new(context: C) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub fn empty() -> Self {
        Self { context: None }
    }

    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }

    /// Release the context before the adaptor goes out of scope.
    pub fn take(&mut self) -> Option<C> {
        self.context.take()
    }
}

impl<C> Default for ContextAdaptor<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C> From<C> for ContextAdaptor<C> {
    fn from(context: C) -> Self {
        Self::new(context)
    }
}
