//! Transaction abstractions shared by all backends.
//!
//! Two styles are supported:
//! * callback style: a [`TransactionManager`] runs a closure inside a scope
//!   described by a [`TransactionDefinition`] and commits or rolls back based on
//!   its result;
//! * explicit style: a [`UnitOfWork`] owns one open transaction that the caller
//!   commits or rolls back.

use std::future::Future;
use std::time::Duration;

use crate::RepoResult;

/// How a transactional scope relates to one that is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Join the running transaction or start one.
    Required,
    /// Always isolate the scope (a savepoint when a transaction is running).
    RequiresNew,
    /// Join if present, otherwise run without a transaction.
    Supports,
    NotSupported,
    /// Fail when a transaction is running.
    Never,
    Nested,
}

/// Requested isolation level; backends map it to the closest level they offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefinition {
    pub propagation: Propagation,
    pub isolation: Isolation,
    pub read_only: bool,
    /// Lock wait budget; backends fall back to their configured default.
    pub timeout: Option<Duration>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            read_only: false,
            timeout: None,
        }
    }
}

impl TransactionDefinition {
    pub fn with_isolation(isolation: Isolation) -> Self {
        Self {
            isolation,
            ..Self::default()
        }
    }
}

/// Token handed to transactional callbacks. Managers use it to vend
/// transaction-bound resources; it carries no data of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionContext<'a> {
    _scope: std::marker::PhantomData<&'a ()>,
}

impl<'a> TransactionContext<'a> {
    pub fn new() -> Self {
        Self {
            _scope: std::marker::PhantomData,
        }
    }
}

/// Backend-implemented callback-style transaction manager.
#[async_trait::async_trait]
pub trait TransactionManager: Send + Sync {
    /// Run `f` inside a scope described by `def`. The transaction commits when
    /// `f` returns `Ok` and rolls back otherwise.
    async fn execute<'a, R, F, Fut>(&'a self, def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: FnOnce(TransactionContext<'a>) -> Fut + Send + 'a,
        Fut: Future<Output = RepoResult<R>> + Send + 'a,
        R: Send + 'a;
}

/// A manager paired with a default definition.
#[derive(Debug)]
pub struct TransactionTemplate<M: TransactionManager> {
    manager: M,
    defaults: TransactionDefinition,
}

impl<M: TransactionManager> TransactionTemplate<M> {
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            defaults: TransactionDefinition::default(),
        }
    }

    pub fn with_defaults(mut self, def: TransactionDefinition) -> Self {
        self.defaults = def;
        self
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub async fn execute<R, F, Fut>(&self, f: F) -> RepoResult<R>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> Fut + Send,
        Fut: Future<Output = RepoResult<R>> + Send,
        R: Send + 'static,
    {
        self.manager.execute(&self.defaults, f).await
    }

    pub async fn execute_with<R, F, Fut>(&self, def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> Fut + Send,
        Fut: Future<Output = RepoResult<R>> + Send,
        R: Send + 'static,
    {
        self.manager.execute(def, f).await
    }
}

/// Runs callbacks without any database transaction. Useful for in-memory sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransactionManager;

#[async_trait::async_trait]
impl TransactionManager for DefaultTransactionManager {
    async fn execute<'a, R, F, Fut>(&'a self, _def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: FnOnce(TransactionContext<'a>) -> Fut + Send + 'a,
        Fut: Future<Output = RepoResult<R>> + Send + 'a,
        R: Send + 'a,
    {
        f(TransactionContext::new()).await
    }
}

pub fn default_transaction_template() -> TransactionTemplate<DefaultTransactionManager> {
    TransactionTemplate::new(DefaultTransactionManager)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    /// No transaction open.
    Idle,
    Active,
    Committed,
    RolledBack,
}

/// One explicit transaction shared by the repositories created from it.
///
/// Writes made through those repositories are applied inside the open
/// transaction; `commit` makes them durable and `rollback` discards them.
#[async_trait::async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Open a transaction. Fails if one is already active.
    async fn begin_transaction(&self, isolation: Isolation) -> RepoResult<()>;

    /// Fails when no transaction is active.
    async fn commit(&self) -> RepoResult<()>;

    /// Fails when no transaction is active.
    async fn rollback(&self) -> RepoResult<()>;

    /// Number of rows written since the previous call.
    async fn save_changes(&self) -> RepoResult<u64>;

    fn state(&self) -> UnitOfWorkState;

    fn is_active(&self) -> bool {
        self.state() == UnitOfWorkState::Active
    }
}

/// Run `f` against `uow`, committing on success and rolling back on failure.
/// A transaction is opened first when none is active.
pub async fn within<'a, U, R, F, Fut>(uow: &'a U, f: F) -> RepoResult<R>
where
    U: UnitOfWork + ?Sized,
    F: FnOnce(&'a U) -> Fut,
    Fut: Future<Output = RepoResult<R>> + 'a,
{
    if !uow.is_active() {
        uow.begin_transaction(Isolation::Default).await?;
    }
    match f(uow).await {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after failed unit of work also failed");
            }
            Err(err)
        }
    }
}
