use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use libsql::{Connection, Database, Row};
use repokit_core::transactions::{
    Isolation, Propagation, TransactionContext, TransactionDefinition, TransactionManager,
};
use repokit_core::{Fetchable, Identifiable, Insertable, RepoError, RepoResult, RowAdapter, Updatable};

use crate::obs::SqlDiagnostics;
use crate::repository::LibsqlRepository;

// Task-local state for the current transaction connection and savepoint depth.
tokio::task_local! {
    static TX_STACK: RefCell<Vec<Connection>>;
    static SP_DEPTH: RefCell<usize>;
}

/// Connection of the innermost transaction running on this task, if any.
pub(crate) fn ambient_connection() -> Option<Connection> {
    TX_STACK
        .try_with(|cell| cell.borrow().last().cloned())
        .ok()
        .flatten()
}

pub(crate) fn begin_sql(isolation: Isolation) -> &'static str {
    match isolation {
        Isolation::Default | Isolation::ReadCommitted => "BEGIN DEFERRED",
        Isolation::RepeatableRead => "BEGIN IMMEDIATE",
        Isolation::Serializable => "BEGIN EXCLUSIVE",
    }
}

/// `PRAGMA busy_timeout` answers with a row, so it goes through `query`.
pub(crate) async fn set_busy_timeout(conn: &Connection, timeout: Duration) -> RepoResult<()> {
    conn.query(&format!("PRAGMA busy_timeout = {}", timeout.as_millis()), ())
        .await
        .map_err(RepoError::backend)?;
    Ok(())
}

/// Callback-style transaction manager for libsql/SQLite.
///
/// The outermost scope opens a connection, begins a transaction and publishes
/// the connection in task-local storage so that every repository used inside
/// the callback joins it. Nested `RequiresNew`/`Nested` scopes become savepoints.
#[derive(Clone)]
pub struct LibsqlTransactionManager {
    db: Arc<Database>,
    busy_timeout: Duration,
    diagnostics: SqlDiagnostics,
}

impl LibsqlTransactionManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            busy_timeout: Duration::from_millis(1000),
            diagnostics: SqlDiagnostics::default(),
        }
    }

    /// Lock wait used when a definition carries no timeout of its own.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: SqlDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Vend a repository bound to the current transaction connection if available,
    /// otherwise a regular repository against the manager's database.
    pub fn repository<T, A>(&self, _ctx: TransactionContext<'_>, adapter: A) -> LibsqlRepository<T, A>
    where
        T: Fetchable + Identifiable + Insertable + Updatable + 'static,
        A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
    {
        let repo = match ambient_connection() {
            Some(conn) => LibsqlRepository::from_conn(self.db.clone(), conn, adapter),
            None => LibsqlRepository::new(self.db.clone(), adapter),
        };
        repo.with_diagnostics(self.diagnostics)
            .with_busy_timeout(self.busy_timeout)
    }
}

#[async_trait::async_trait]
impl TransactionManager for LibsqlTransactionManager {
    async fn execute<'a, R, F, Fut>(&'a self, def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: FnOnce(TransactionContext<'a>) -> Fut + Send + 'a,
        Fut: core::future::Future<Output = RepoResult<R>> + Send + 'a,
        R: Send + 'a,
    {
        let fut = async {
            let active = ambient_connection();

            if matches!(def.propagation, Propagation::NotSupported | Propagation::Supports)
                && active.is_none()
            {
                return f(TransactionContext::new()).await;
            }
            if def.propagation == Propagation::Never && active.is_some() {
                return Err(RepoError::Transaction(
                    "transaction exists but Propagation::Never requested",
                ));
            }

            let Some(conn) = active else {
                return self.run_outermost(def, f).await;
            };

            if !matches!(def.propagation, Propagation::RequiresNew | Propagation::Nested) {
                return f(TransactionContext::new()).await;
            }

            let depth = SP_DEPTH.with(|d| {
                let mut d = d.borrow_mut();
                *d += 1;
                *d
            });
            let name = format!("sp{depth}");
            let opened = conn
                .execute(&format!("SAVEPOINT {name}"), ())
                .await
                .map_err(RepoError::backend);
            let result = match opened {
                Ok(_) => f(TransactionContext::new()).await,
                Err(e) => Err(e),
            };
            let close = if result.is_ok() {
                format!("RELEASE SAVEPOINT {name}")
            } else {
                format!("ROLLBACK TO SAVEPOINT {name}")
            };
            if let Err(e) = conn.execute(&close, ()).await {
                tracing::warn!(savepoint = %name, error = %e, "failed to close savepoint");
            }
            SP_DEPTH.with(|d| {
                let mut d = d.borrow_mut();
                *d = d.saturating_sub(1);
            });
            result
        };

        // Set up the task-local scopes the first time this task enters a transaction.
        if TX_STACK.try_with(|_| ()).is_err() {
            TX_STACK
                .scope(RefCell::new(Vec::new()), async move {
                    SP_DEPTH.scope(RefCell::new(0usize), fut).await
                })
                .await
        } else {
            fut.await
        }
    }
}

impl LibsqlTransactionManager {
    async fn run_outermost<'a, R, F, Fut>(&'a self, def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: FnOnce(TransactionContext<'a>) -> Fut + Send + 'a,
        Fut: core::future::Future<Output = RepoResult<R>> + Send + 'a,
        R: Send + 'a,
    {
        let conn = self.db.connect().map_err(RepoError::backend)?;
        if def.read_only {
            conn.execute("PRAGMA query_only = ON", ())
                .await
                .map_err(RepoError::backend)?;
        }
        set_busy_timeout(&conn, def.timeout.unwrap_or(self.busy_timeout)).await?;
        let begin = begin_sql(def.isolation);
        self.diagnostics.statement(begin, &[]);
        conn.execute(begin, ())
            .await
            .map_err(|e| self.diagnostics.fail(begin, e))?;

        TX_STACK.with(|cell| cell.borrow_mut().push(conn.clone()));
        SP_DEPTH.with(|d| *d.borrow_mut() = 0);

        let result = f(TransactionContext::new()).await;

        TX_STACK.with(|cell| {
            cell.borrow_mut().pop();
        });
        let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
        self.diagnostics.statement(end, &[]);
        let ended = conn.execute(end, ()).await;
        if def.read_only {
            conn.execute("PRAGMA query_only = OFF", ()).await.ok();
        }
        match (result, ended) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(self.diagnostics.fail(end, e)),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(rollback_err)) => {
                tracing::warn!(error = %rollback_err, "rollback after failed transaction also failed");
                Err(e)
            }
        }
    }
}
