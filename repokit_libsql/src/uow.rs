use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libsql::{Connection, Database, Row};
use repokit_core::transactions::{within, Isolation, UnitOfWork, UnitOfWorkState};
use repokit_core::{Fetchable, Identifiable, Insertable, RepoError, RepoResult, RowAdapter, Updatable};

use crate::obs::SqlDiagnostics;
use crate::repository::LibsqlRepository;
use crate::tx::{begin_sql, set_busy_timeout};

/// One explicit transaction on a dedicated connection.
///
/// Repositories obtained from [`LibsqlUnitOfWork::repository`] run on the
/// unit's connection, so their writes become durable on `commit` and vanish on
/// `rollback`. Writes are applied immediately; `save_changes` reports how many
/// rows were written since it was last called.
pub struct LibsqlUnitOfWork {
    db: Arc<Database>,
    conn: Connection,
    diagnostics: SqlDiagnostics,
    state: Mutex<UnitOfWorkState>,
    // Serializes transitions; `state` alone is read synchronously.
    transition: tokio::sync::Mutex<()>,
    changes: Arc<AtomicU64>,
}

impl LibsqlUnitOfWork {
    /// Open a connection and begin a transaction with the default isolation.
    pub async fn begin(
        db: Arc<Database>,
        busy_timeout: Duration,
        diagnostics: SqlDiagnostics,
    ) -> RepoResult<Self> {
        let conn = db.connect().map_err(RepoError::backend)?;
        set_busy_timeout(&conn, busy_timeout).await?;
        let uow = Self {
            db,
            conn,
            diagnostics,
            state: Mutex::new(UnitOfWorkState::Idle),
            transition: tokio::sync::Mutex::new(()),
            changes: Arc::new(AtomicU64::new(0)),
        };
        uow.begin_transaction(Isolation::Default).await?;
        Ok(uow)
    }

    /// A repository whose operations run inside this unit's transaction.
    pub fn repository<T, A>(&self, adapter: A) -> LibsqlRepository<T, A>
    where
        T: Fetchable + Identifiable + Insertable + Updatable + 'static,
        A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
    {
        LibsqlRepository::from_conn(self.db.clone(), self.conn.clone(), adapter)
            .with_diagnostics(self.diagnostics)
            .with_change_counter(self.changes.clone())
    }

    /// Run `f` and commit when it succeeds, roll back when it fails.
    /// A new transaction is begun first if the previous one already ended.
    pub async fn execute<'a, R, F, Fut>(&'a self, f: F) -> RepoResult<R>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = RepoResult<R>> + 'a,
    {
        within(self, f).await
    }

    fn set_state(&self, next: UnitOfWorkState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
    }

    async fn finish(&self, sql: &'static str, next: UnitOfWorkState) -> RepoResult<()> {
        let _guard = self.transition.lock().await;
        if !self.is_active() {
            return Err(RepoError::Transaction("no active transaction"));
        }
        self.diagnostics.statement(sql, &[]);
        self.conn
            .execute(sql, ())
            .await
            .map_err(|e| self.diagnostics.fail(sql, e))?;
        self.set_state(next);
        tracing::debug!(state = ?next, "unit of work finished");
        Ok(())
    }
}

#[async_trait::async_trait]
impl UnitOfWork for LibsqlUnitOfWork {
    async fn begin_transaction(&self, isolation: Isolation) -> RepoResult<()> {
        let _guard = self.transition.lock().await;
        if self.is_active() {
            return Err(RepoError::Transaction("a transaction is already active"));
        }
        let sql = begin_sql(isolation);
        self.diagnostics.statement(sql, &[]);
        self.conn
            .execute(sql, ())
            .await
            .map_err(|e| self.diagnostics.fail(sql, e))?;
        self.changes.store(0, Ordering::Relaxed);
        self.set_state(UnitOfWorkState::Active);
        Ok(())
    }

    async fn commit(&self) -> RepoResult<()> {
        self.finish("COMMIT", UnitOfWorkState::Committed).await
    }

    async fn rollback(&self) -> RepoResult<()> {
        self.finish("ROLLBACK", UnitOfWorkState::RolledBack).await
    }

    async fn save_changes(&self) -> RepoResult<u64> {
        Ok(self.changes.swap(0, Ordering::Relaxed))
    }

    fn state(&self) -> UnitOfWorkState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for LibsqlUnitOfWork {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::warn!("unit of work dropped with an open transaction; it will be rolled back");
        }
    }
}

impl std::fmt::Debug for LibsqlUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibsqlUnitOfWork")
            .field("state", &self.state())
            .field("pending_changes", &self.changes.load(Ordering::Relaxed))
            .finish()
    }
}
