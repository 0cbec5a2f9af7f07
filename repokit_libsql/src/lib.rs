#![forbid(unsafe_code)]
#![cfg_attr(
    not(feature = "libsql-backend"),
    doc = "Enable feature `libsql-backend` to use this adapter."
)]
//! LibSQL / SQLite backend for repokit.
//!
//! - [`LibsqlContext`] opens a database from [`repokit_core::ContextOptions`] or
//!   a named connection string and vends repositories, units of work and
//!   transaction managers;
//! - [`LibsqlRepository`] implements `Repository` and `QuerySource` by rendering
//!   statements with `repokit_sql_builder`;
//! - [`RecordRowAdapter`] maps rows onto any `Record + Default` by column name;
//! - [`LibsqlUnitOfWork`] holds one explicit transaction;
//! - [`LibsqlTransactionManager`] runs callbacks in transactions and savepoints.

#[cfg(feature = "libsql-backend")]
mod context;
#[cfg(feature = "libsql-backend")]
mod obs;
#[cfg(feature = "libsql-backend")]
mod repository;
#[cfg(feature = "libsql-backend")]
mod row;
#[cfg(feature = "libsql-backend")]
mod tx;
#[cfg(feature = "libsql-backend")]
mod uow;

#[cfg(feature = "libsql-backend")]
pub use context::LibsqlContext;
#[cfg(feature = "libsql-backend")]
pub use obs::SqlDiagnostics;
#[cfg(feature = "libsql-backend")]
pub use repository::LibsqlRepository;
#[cfg(feature = "libsql-backend")]
pub use row::{from_libsql_value, to_libsql_value, RecordRowAdapter};
#[cfg(feature = "libsql-backend")]
pub use tx::LibsqlTransactionManager;
#[cfg(feature = "libsql-backend")]
pub use uow::LibsqlUnitOfWork;

#[cfg(feature = "libsql-backend")]
pub use libsql;
