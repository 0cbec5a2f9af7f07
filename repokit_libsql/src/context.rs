use std::sync::Arc;

use libsql::{Connection, Database, Row};
use repokit_core::{
    ContextAdaptor, ContextOptions, DataConfig, DbContext, Fetchable, Identifiable, Insertable,
    Record, RepoError, RepoResult, RowAdapter, Updatable,
};

use crate::obs::SqlDiagnostics;
use crate::repository::LibsqlRepository;
use crate::row::RecordRowAdapter;
use crate::tx::{set_busy_timeout, LibsqlTransactionManager};
use crate::uow::LibsqlUnitOfWork;

/// An opened libsql database plus the options it was opened with.
///
/// Cloning is cheap and shares the database. Each call to
/// [`DbContext::unit_of_work`] opens a new unit with its own connection.
#[derive(Clone)]
pub struct LibsqlContext {
    db: Arc<Database>,
    options: Arc<ContextOptions>,
    // Named in-memory databases live only while a connection is open.
    _keepalive: Option<Connection>,
}

impl LibsqlContext {
    pub async fn open(options: ContextOptions) -> RepoResult<Self> {
        // Database::open is deprecated upstream; keep a narrow allow here until Builder migration
        #[allow(deprecated)]
        let db = Database::open(options.connection_string.as_str()).map_err(RepoError::backend)?;
        let keepalive = if options.is_in_memory() {
            let conn = db.connect().map_err(RepoError::backend)?;
            set_busy_timeout(&conn, options.busy_timeout).await?;
            Some(conn)
        } else {
            None
        };
        tracing::info!(
            database = options.database_name.as_deref().unwrap_or("file"),
            in_memory = options.is_in_memory(),
            "opened libsql context"
        );
        Ok(Self {
            db: Arc::new(db),
            options: Arc::new(options),
            _keepalive: keepalive,
        })
    }

    /// Open the database behind the connection string called `name` and wrap the
    /// context in an adaptor that owns it for the caller's scope.
    pub async fn register(config: &DataConfig, name: &str) -> RepoResult<ContextAdaptor<Self>> {
        let options = ContextOptions::from_config(config, name)?;
        Ok(ContextAdaptor::new(Self::open(options).await?))
    }

    /// Like [`LibsqlContext::register`] but targets the named shared in-memory
    /// database when `database_name` is given.
    pub async fn register_in_memory(
        config: &DataConfig,
        name: &str,
        database_name: Option<&str>,
    ) -> RepoResult<ContextAdaptor<Self>> {
        let options = ContextOptions::from_config_or_memory(config, name, database_name)?;
        Ok(ContextAdaptor::new(Self::open(options).await?))
    }

    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn diagnostics(&self) -> SqlDiagnostics {
        SqlDiagnostics::from(self.options.as_ref())
    }

    /// Run a batch of statements, such as a schema script, on a fresh connection.
    pub async fn execute_batch(&self, sql: &str) -> RepoResult<()> {
        let conn = self.db.connect().map_err(RepoError::backend)?;
        set_busy_timeout(&conn, self.options.busy_timeout).await?;
        self.diagnostics().statement(sql, &[]);
        conn.execute_batch(sql)
            .await
            .map_err(|e| self.diagnostics().fail(sql, e))?;
        Ok(())
    }

    /// A repository outside any unit of work.
    pub fn repository<T, A>(&self, adapter: A) -> LibsqlRepository<T, A>
    where
        T: Fetchable + Identifiable + Insertable + Updatable + 'static,
        A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
    {
        LibsqlRepository::new(self.db.clone(), adapter)
            .with_diagnostics(self.diagnostics())
            .with_busy_timeout(self.options.busy_timeout)
    }

    /// A repository that maps rows through the entity's field registry.
    pub fn records<T>(&self) -> LibsqlRepository<T, RecordRowAdapter<T>>
    where
        T: Fetchable + Identifiable + Insertable + Updatable + Record + Default + 'static,
    {
        self.repository(RecordRowAdapter::new())
    }

    pub fn transaction_manager(&self) -> LibsqlTransactionManager {
        LibsqlTransactionManager::new(self.db.clone())
            .with_busy_timeout(self.options.busy_timeout)
            .with_diagnostics(self.diagnostics())
    }
}

#[async_trait::async_trait]
impl DbContext for LibsqlContext {
    type UnitOfWork = LibsqlUnitOfWork;

    fn options(&self) -> &ContextOptions {
        &self.options
    }

    async fn unit_of_work(&self) -> RepoResult<LibsqlUnitOfWork> {
        LibsqlUnitOfWork::begin(self.db.clone(), self.options.busy_timeout, self.diagnostics()).await
    }
}

impl std::fmt::Debug for LibsqlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibsqlContext")
            .field("database_name", &self.options.database_name)
            .field("in_memory", &self.options.is_in_memory())
            .finish()
    }
}
