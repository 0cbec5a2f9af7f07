#![forbid(unsafe_code)]
//! Facade crate re-exporting the repokit core, the `Entity` derive and the
//! optional query extensions and backends.
//!
//! ```ignore
//! use repokit::{Entity, Query, QuerySource};
//! use repokit::query_ext::QuerySourceExt;
//!
//! #[derive(Entity, Clone, Debug, Default)]
//! pub struct Customer {
//!     #[fetch(id)]
//!     pub id: Option<i64>,
//!     pub name: String,
//!     #[fetch(column = "email_address")]
//!     pub email: Option<String>,
//! }
//!
//! // Field names come from user input; unknown names are errors, not panics.
//! let q = Query::<Customer>::new()
//!     .filter("name", "ann")?
//!     .sort_by_orders(["email:desc".parse::<repokit::SortOrder>()?])?;
//! let page = repo.pagination(&q, 2, 20).await?;
//! ```

// Re-export all core traits and types.
pub use repokit_core::{
    async_trait, project, ConfigError, ContextAdaptor, ContextOptions, DataConfig, DbContext,
    Fetchable, Field, FieldKind, FieldRegistry, FieldValue, Identifiable, Insertable, ParamValue,
    Predicate, Projection, ProjectionCache, ProjectionError, ProjectionExpression, Query,
    QueryError, QuerySource, Record, RepoError, RepoResult, Repository, RowAdapter, SortDirection,
    SortKey, SortOrder, Updatable,
};

pub use repokit_macros::Entity;

// Optional re-export of the SQL builder helpers.
#[cfg(feature = "sql-builder")]
pub use repokit_sql_builder as sql_builder;

// Backend-agnostic transactions and unit of work API.
pub use repokit_core::transactions;

#[cfg(feature = "query-ext")]
pub mod query_ext;

#[cfg(feature = "stream-ext")]
pub mod stream_ext;

pub mod backends {
    #[cfg(feature = "libsql-backend")]
    pub use repokit_libsql::{
        LibsqlContext, LibsqlRepository, LibsqlTransactionManager, LibsqlUnitOfWork,
        RecordRowAdapter, SqlDiagnostics,
    };
}
