use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use libsql::{Connection, Database, Row, Value};
use repokit_core::{
    Fetchable, Field, Identifiable, Insertable, ParamValue, Query, QueryError, QuerySource, Record,
    RepoError, RepoResult, Repository, RowAdapter, Updatable,
};

use crate::obs::{obs_record, SqlDiagnostics};
use crate::row::to_libsql_values;
use crate::tx::{ambient_connection, set_busy_timeout};

/// Statements rendered once per repository.
struct RepoSql<T> {
    select_by_id: String,
    delete_by_id: String,
    insert: String,
    update_by_id: String,
    find_by_field_cache: Mutex<HashMap<&'static str, String>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RepoSql<T>
where
    T: Fetchable + Identifiable + Insertable + Updatable,
{
    fn new() -> Self {
        Self {
            select_by_id: repokit_sql_builder::select_by_id::<T>(T::ID_COLUMN),
            delete_by_id: repokit_sql_builder::delete_by_id::<T>(T::ID_COLUMN),
            insert: repokit_sql_builder::insert::<T>(T::ID_COLUMN),
            update_by_id: repokit_sql_builder::update_by_id::<T>(T::ID_COLUMN),
            find_by_field_cache: Mutex::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    fn select_by_field(&self, column: &'static str) -> String {
        // A poisoned cache only holds complete strings, so keep using it.
        let mut guard = self
            .find_by_field_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .entry(column)
            .or_insert_with(|| repokit_sql_builder::select_by_field::<T>(column))
            .clone()
    }
}

/// A fully asynchronous, `libsql`-backed repository.
///
/// Each operation runs on the connection the repository was bound to, else on
/// the connection of the innermost transaction on the current task, else on a
/// fresh connection.
pub struct LibsqlRepository<T, A>
where
    T: 'static,
    A: RowAdapter<T> + Send + Sync + 'static,
{
    db: Arc<Database>,
    /// Connection bound to a unit of work or transaction scope.
    conn: Option<Connection>,
    adapter: A,
    sql: RepoSql<T>,
    diagnostics: SqlDiagnostics,
    busy_timeout: Option<Duration>,
    /// Rows written through this repository, shared with the owning unit of work.
    changes: Option<Arc<AtomicU64>>,
}

impl<T, A> LibsqlRepository<T, A>
where
    T: Fetchable + Identifiable + Insertable + Updatable + 'static,
    A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
{
    /// Creates a new repository from an existing `libsql::Database` object.
    pub fn new(db: Arc<Database>, adapter: A) -> Self {
        Self {
            db,
            conn: None,
            adapter,
            sql: RepoSql::new(),
            diagnostics: SqlDiagnostics::default(),
            busy_timeout: None,
            changes: None,
        }
    }

    /// Creates a repository whose operations run on `conn`.
    pub fn from_conn(db: Arc<Database>, conn: Connection, adapter: A) -> Self {
        Self {
            conn: Some(conn),
            ..Self::new(db, adapter)
        }
    }

    /// Creates a new repository by connecting to a database URL.
    pub async fn from_url(database_url: &str, adapter: A) -> RepoResult<Self> {
        // Database::open is deprecated upstream; keep a narrow allow here until Builder migration
        #[allow(deprecated)]
        let db = Arc::new(Database::open(database_url).map_err(RepoError::backend)?);
        Ok(Self::new(db, adapter))
    }

    pub fn with_diagnostics(mut self, diagnostics: SqlDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Applied to every fresh connection the repository opens.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub(crate) fn with_change_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.changes = Some(counter);
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    async fn connection(&self) -> RepoResult<Connection> {
        if let Some(conn) = &self.conn {
            return Ok(conn.clone());
        }
        if let Some(conn) = ambient_connection() {
            return Ok(conn);
        }
        let conn = self.db.connect().map_err(RepoError::backend)?;
        if let Some(timeout) = self.busy_timeout {
            set_busy_timeout(&conn, timeout).await?;
        }
        Ok(conn)
    }

    fn record_changes(&self, n: u64) {
        if let Some(counter) = &self.changes {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    async fn exec(&self, op: &str, sql: &str, params: Vec<ParamValue>) -> RepoResult<u64> {
        let start = Instant::now();
        self.diagnostics.statement(sql, &params);
        let conn = self.connection().await?;
        match conn.execute(sql, to_libsql_values(params)).await {
            Ok(n) => {
                obs_record(op, T::TABLE, start, n as usize, true);
                self.record_changes(n);
                Ok(n)
            }
            Err(e) => {
                obs_record(op, T::TABLE, start, 0, false);
                Err(self.diagnostics.fail(sql, e))
            }
        }
    }

    async fn query_rows<R>(
        &self,
        op: &str,
        sql: &str,
        params: Vec<ParamValue>,
        map: impl Fn(&Row) -> RepoResult<R> + Send,
    ) -> RepoResult<Vec<R>> {
        let start = Instant::now();
        self.diagnostics.statement(sql, &params);
        let conn = self.connection().await?;
        let result = async {
            let mut rows = conn
                .query(sql, to_libsql_values(params))
                .await
                .map_err(|e| self.diagnostics.fail(sql, e))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().await.map_err(|e| self.diagnostics.fail(sql, e))? {
                out.push(map(&row)?);
            }
            Ok(out)
        }
        .await;
        match &result {
            Ok(out) => obs_record(op, T::TABLE, start, out.len(), true),
            Err(_) => obs_record(op, T::TABLE, start, 0, false),
        }
        result
    }

    /// Run a caller-written `SELECT` and map each row with the repository's adapter.
    pub async fn sql_query(&self, sql: &str, params: Vec<ParamValue>) -> RepoResult<Vec<T>> {
        self.query_rows("sql_query", sql, params, |row| self.adapter.from_row(row))
            .await
    }

    /// Run a caller-written statement and map each row with `map`.
    pub async fn raw_sql<R, F>(&self, sql: &str, params: Vec<ParamValue>, map: F) -> RepoResult<Vec<R>>
    where
        F: Fn(&Row) -> RepoResult<R> + Send,
    {
        self.query_rows("raw_sql", sql, params, map).await
    }

    /// Insert all entities with one multi-row statement. Returns the rows written.
    pub async fn insert_all(&self, entities: &[T]) -> RepoResult<u64> {
        let Some(sql) = repokit_sql_builder::insert_many::<T>(entities.len(), T::ID_COLUMN) else {
            return Ok(0);
        };
        let params: Vec<ParamValue> = entities.iter().flat_map(Insertable::insert_values).collect();
        #[cfg(feature = "returning")]
        {
            let rows = self
                .query_rows("insert_all", &sql, params, |_| Ok(()))
                .await?;
            self.record_changes(rows.len() as u64);
            Ok(rows.len() as u64)
        }
        #[cfg(not(feature = "returning"))]
        {
            self.exec("insert_all", &sql, params).await
        }
    }
}

impl<T, A> LibsqlRepository<T, A>
where
    T: Fetchable + Identifiable + Insertable + Updatable + Record + 'static,
    A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
{
    /// Resolve a field name (or column name) to its field.
    fn field_of(field_name: &str) -> RepoResult<&'static Field<T>> {
        let registry = T::fields();
        registry
            .get_ignore_case(field_name)
            .filter(|f| f.is_scalar())
            .or_else(|| registry.by_column(field_name))
            .ok_or_else(|| {
                QueryError::UnknownField {
                    entity: registry.entity(),
                    field: field_name.to_owned(),
                }
                .into()
            })
    }
}

fn key_value<T>(id: &T::Key) -> Value
where
    T: Identifiable,
    T::Key: Clone + Into<Value>,
{
    id.clone().into()
}

fn count_from_row(row: &Row) -> RepoResult<u64> {
    let n: i64 = row.get(0).map_err(RepoError::mapping)?;
    Ok(u64::try_from(n).unwrap_or(0))
}

#[async_trait]
impl<T, A> Repository<T> for LibsqlRepository<T, A>
where
    T: Fetchable + Identifiable + Insertable + Updatable + Record + Send + Sync + Clone + 'static,
    A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
    T::Key: Clone
        + Send
        + Sync
        + 'static
        + Into<Value>
        + serde::Serialize
        + serde::de::DeserializeOwned,
{
    async fn find_by_id(&self, id: &T::Key) -> RepoResult<Option<T>> {
        let start = Instant::now();
        let sql = &self.sql.select_by_id;
        self.diagnostics.statement(sql, &[]);
        let conn = self.connection().await?;
        let mut rows = conn
            .query(sql, vec![key_value::<T>(id)])
            .await
            .map_err(|e| self.diagnostics.fail(sql, e))?;
        match rows.next().await.map_err(|e| self.diagnostics.fail(sql, e))? {
            Some(row) => match self.adapter.from_row(&row) {
                Ok(entity) => {
                    obs_record("find_by_id", T::TABLE, start, 1, true);
                    Ok(Some(entity))
                }
                Err(e) => {
                    obs_record("find_by_id", T::TABLE, start, 0, false);
                    Err(e)
                }
            },
            None => {
                obs_record("find_by_id", T::TABLE, start, 0, true);
                Ok(None)
            }
        }
    }

    async fn find_by_field(&self, field_name: &str, value: ParamValue) -> RepoResult<Vec<T>> {
        let field = Self::field_of(field_name)?;
        let value = value
            .coerce(field.kind(), field.nullable())
            .map_err(|source| QueryError::Coerce {
                field: field.name(),
                source,
            })?;
        let sql = self.sql.select_by_field(field.column());
        self.query_rows("find_by_field", &sql, vec![value], |row| self.adapter.from_row(row))
            .await
    }

    async fn insert(&self, entity: &T) -> RepoResult<T> {
        let start = Instant::now();
        let sql = &self.sql.insert;
        let values = entity.insert_values();
        self.diagnostics.statement(sql, &values);
        let conn = self.connection().await?;

        #[cfg(feature = "returning")]
        let new_id: i64 = {
            let mut rows = conn
                .query(sql, to_libsql_values(values))
                .await
                .map_err(|e| self.diagnostics.fail(sql, e))?;
            let row = rows
                .next()
                .await
                .map_err(|e| self.diagnostics.fail(sql, e))?
                .ok_or(RepoError::NotFound)?;
            row.get(0).map_err(RepoError::mapping)?
        };
        #[cfg(not(feature = "returning"))]
        let new_id: i64 = {
            conn.execute(sql, to_libsql_values(values))
                .await
                .map_err(|e| self.diagnostics.fail(sql, e))?;
            conn.last_insert_rowid()
        };
        self.record_changes(1);

        let new_key: T::Key =
            serde_json::from_value(serde_json::Value::from(new_id)).map_err(RepoError::mapping)?;
        // Read back on the same connection so uncommitted rows are visible.
        let mut rows = conn
            .query(&self.sql.select_by_id, vec![key_value::<T>(&new_key)])
            .await
            .map_err(|e| self.diagnostics.fail(&self.sql.select_by_id, e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| self.diagnostics.fail(&self.sql.select_by_id, e))?;
        let out = match row {
            Some(row) => self.adapter.from_row(&row),
            None => Err(RepoError::NotFound),
        };
        obs_record("insert", T::TABLE, start, usize::from(out.is_ok()), out.is_ok());
        out
    }

    /// Fails with [`RepoError::NotFound`] when no row has the entity's key.
    async fn update(&self, entity: &T) -> RepoResult<T> {
        let n = self
            .exec("update", &self.sql.update_by_id, entity.update_values())
            .await?;
        if n == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(entity.clone())
    }

    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<bool> {
        let start = Instant::now();
        let sql = &self.sql.delete_by_id;
        self.diagnostics.statement(sql, &[]);
        let conn = self.connection().await?;
        let n = conn
            .execute(sql, vec![key_value::<T>(id)])
            .await
            .map_err(|e| self.diagnostics.fail(sql, e))?;
        self.record_changes(n);
        obs_record("delete_by_id", T::TABLE, start, n as usize, true);
        Ok(n > 0)
    }

    async fn delete_where(&self, query: &Query<T>) -> RepoResult<u64> {
        let (sql, params) = repokit_sql_builder::delete_query(query);
        self.exec("delete_where", &sql, params).await
    }

    async fn insert_many(&self, entities: &[T]) -> RepoResult<Vec<T>> {
        let mut out = Vec::with_capacity(entities.len());
        for e in entities {
            out.push(self.insert(e).await?);
        }
        Ok(out)
    }
}

#[async_trait]
impl<T, A> QuerySource<T> for LibsqlRepository<T, A>
where
    T: Fetchable + Identifiable + Insertable + Updatable + Record + Send + Sync + 'static,
    A: RowAdapter<T, Row = Row> + Send + Sync + 'static,
{
    async fn fetch(&self, query: &Query<T>) -> RepoResult<Vec<T>> {
        let (sql, params) = repokit_sql_builder::select_query(query);
        self.query_rows("fetch", &sql, params, |row| self.adapter.from_row(row))
            .await
    }

    async fn count(&self, query: &Query<T>) -> RepoResult<u64> {
        let (sql, params) = repokit_sql_builder::count_query(query);
        let counts = self.query_rows("count", &sql, params, count_from_row).await?;
        Ok(counts.into_iter().next().unwrap_or(0))
    }
}
