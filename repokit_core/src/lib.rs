#![forbid(unsafe_code)]
//! Core traits for the repokit data-access toolkit.
//! This crate is database-agnostic and should not contain any backend-specific logic.

// Re-export for downstream macro expansions and backend crates.
pub use async_trait::async_trait;

pub mod config;
pub mod context;
pub mod projection;
pub mod query;
pub mod record;
pub mod transactions;
pub mod value;

pub use config::{ConfigError, DataConfig};
pub use context::{ContextAdaptor, ContextOptions, DbContext};
pub use projection::{project, Projection, ProjectionCache, ProjectionError, ProjectionExpression};
pub use query::{Predicate, Query, QueryError, SortDirection, SortKey, SortOrder};
pub use record::{Field, FieldRegistry, Getter, Nested, NestedField, Record, Setter};
pub use value::{CoerceError, FieldKind, FieldValue, ParamValue};

/// Table metadata for types that can be fetched from a database.
/// Implemented by `#[derive(Entity)]`.
pub trait Fetchable {
    const TABLE: &'static str;
    /// Persisted columns in declaration order; row adapters may rely on it.
    const SELECT_COLUMNS: &'static [&'static str];
}

/// Trait for entities that have an identifiable key.
pub trait Identifiable {
    /// The type of the primary key (e.g., `i64`).
    type Key;

    /// The name of the primary key column in the database.
    const ID_COLUMN: &'static str;

    /// Returns a copy of the entity's ID, if it has one.
    fn id(&self) -> Option<Self::Key>;
}

/// Columns and values for an INSERT statement, excluding the generated key.
pub trait Insertable {
    const INSERT_COLUMNS: &'static [&'static str];

    /// The values of the fields corresponding to `INSERT_COLUMNS`.
    fn insert_values(&self) -> Vec<ParamValue>;
}

/// Columns and values for an UPDATE statement. The key value comes last.
pub trait Updatable {
    const UPDATE_COLUMNS: &'static [&'static str];

    fn update_values(&self) -> Vec<ParamValue>;
}

/// Lightweight, backend-agnostic error type for repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// The entity was not found.
    #[error("entity not found")]
    NotFound,
    /// A single result was requested but the query matched several.
    #[error("query matched more than one entity")]
    MultipleResults,
    /// Error while mapping a backend row into an entity.
    #[error("mapping error")]
    Mapping {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Opaque backend error from the underlying driver or adapter.
    #[error("backend error")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Backend error with the failing statement attached (detailed errors enabled).
    #[error("statement failed: {sql}")]
    Statement {
        sql: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Misuse of a unit of work or transaction scope.
    #[error("transaction error: {0}")]
    Transaction(&'static str),
}

impl RepoError {
    /// Wrap a backend/driver error.
    pub fn backend<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Backend {
            source: Box::new(e),
        }
    }
    /// Wrap a row-mapping error.
    pub fn mapping<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Mapping {
            source: Box::new(e),
        }
    }
    pub fn statement<E>(sql: impl Into<String>, e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Statement {
            sql: sql.into(),
            source: Box::new(e),
        }
    }
}

impl From<CoerceError> for RepoError {
    fn from(e: CoerceError) -> Self {
        RepoError::mapping(e)
    }
}

/// Convenience alias for results returned by repository methods.
pub type RepoResult<T> = Result<T, RepoError>;

/// A minimal, asynchronous repository interface for an entity `T`.
/// This is intentionally DB-agnostic. Concrete backends provide implementations.
#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Identifiable + Record + Send + Sync,
{
    /// Fetch an entity by its primary key. Returns Ok(None) if not found.
    async fn find_by_id(&self, id: &T::Key) -> RepoResult<Option<T>>;

    /// All entities whose `field_name` column equals `value`.
    async fn find_by_field(&self, field_name: &str, value: ParamValue) -> RepoResult<Vec<T>>;

    /// Insert a new entity. The returned entity may be different if the database
    /// generates some fields (e.g., auto-incrementing IDs).
    async fn insert(&self, entity: &T) -> RepoResult<T>;

    /// Update an existing entity. The returned entity may be different if the
    /// database modifies it.
    async fn update(&self, entity: &T) -> RepoResult<T>;

    /// Delete an entity by key. Returns true if a row was affected.
    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<bool>;

    /// Delete every entity matching the query's predicates. Returns the number removed.
    async fn delete_where(&self, query: &Query<T>) -> RepoResult<u64>;

    /// Insert several entities in order, returning them as stored.
    async fn insert_many(&self, entities: &[T]) -> RepoResult<Vec<T>> {
        let mut out = Vec::with_capacity(entities.len());
        for e in entities {
            out.push(self.insert(e).await?);
        }
        Ok(out)
    }

    /// Delete by the entity's key. Entities without a key are left alone.
    async fn delete(&self, entity: &T) -> RepoResult<bool>
    where
        T::Key: Send + Sync,
    {
        match entity.id() {
            Some(id) => self.delete_by_id(&id).await,
            None => Ok(false),
        }
    }
}

/// Anything a [`Query`] can be evaluated against.
#[async_trait]
pub trait QuerySource<T: Record>: Send + Sync {
    async fn fetch(&self, query: &Query<T>) -> RepoResult<Vec<T>>;

    /// Count rows matching the predicates, ignoring ordering and window.
    async fn count(&self, query: &Query<T>) -> RepoResult<u64>;
}

#[async_trait]
impl<T> QuerySource<T> for Vec<T>
where
    T: Record + Clone + Send + Sync,
{
    async fn fetch(&self, query: &Query<T>) -> RepoResult<Vec<T>> {
        Ok(query.apply(self.iter().cloned()))
    }

    async fn count(&self, query: &Query<T>) -> RepoResult<u64> {
        Ok(query.count_in(self.iter()))
    }
}

/// Maps a backend-specific row type into an entity `T`.
#[allow(clippy::wrong_self_convention)]
pub trait RowAdapter<T> {
    type Row;
    fn from_row(&self, row: &Self::Row) -> RepoResult<T>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{person, Person};

    #[test]
    fn repo_error_display_messages() {
        assert_eq!(RepoError::NotFound.to_string(), "entity not found");
        assert_eq!(
            RepoError::mapping(std::io::Error::new(std::io::ErrorKind::Other, "bad row")).to_string(),
            "mapping error"
        );
        assert_eq!(
            RepoError::backend(std::io::Error::new(std::io::ErrorKind::Other, "boom")).to_string(),
            "backend error"
        );
        assert_eq!(
            RepoError::statement("SELECT 1", std::io::Error::new(std::io::ErrorKind::Other, "x"))
                .to_string(),
            "statement failed: SELECT 1"
        );
        assert_eq!(
            RepoError::from(QueryError::InvalidChunkSize).to_string(),
            "chunk size must be greater than zero"
        );
    }

    #[test]
    fn coerce_errors_become_mapping_errors() {
        let e: RepoError = CoerceError::Null { to: FieldKind::I32 }.into();
        assert!(matches!(e, RepoError::Mapping { .. }));
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct MiniEntity {
        id: Option<i64>,
    }

    impl Identifiable for MiniEntity {
        type Key = i64;
        const ID_COLUMN: &'static str = "id";
        fn id(&self) -> Option<Self::Key> {
            self.id
        }
    }

    struct MiniAdapter;
    impl RowAdapter<MiniEntity> for MiniAdapter {
        type Row = i64;
        fn from_row(&self, row: &Self::Row) -> RepoResult<MiniEntity> {
            Ok(MiniEntity { id: Some(*row) })
        }
    }

    #[test]
    fn row_adapter_from_row_works() {
        assert_eq!(MiniAdapter.from_row(&7).unwrap(), MiniEntity { id: Some(7) });
    }

    #[test]
    fn vec_is_a_query_source() {
        let rows = vec![
            person(1, "Ann", 20, true),
            person(2, "Ben", 30, false),
            person(3, "Cat", 40, true),
        ];
        let q = Query::<Person>::new()
            .where_eq("active", true)
            .0
            .sort_by_descending("age")
            .unwrap()
            .take(1);
        let got = futures::executor::block_on(rows.fetch(&q)).unwrap();
        assert_eq!(got.iter().map(|p| p.id).collect::<Vec<_>>(), [3]);
        assert_eq!(futures::executor::block_on(rows.count(&q)).unwrap(), 2);
    }
}
