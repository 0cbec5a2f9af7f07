#![forbid(unsafe_code)]
//! SQL string builders driven by the metadata from `#[derive(Entity)]`.
//!
//! Two families of helpers live here:
//! - fixed CRUD statements (`select_by_id`, `insert`, `update_by_id`, ...) that a
//!   repository renders once and reuses;
//! - renderers for the backend-agnostic [`Query`] model (`select_query`,
//!   `count_query`, `delete_query`) that return the statement together with its
//!   parameters in placeholder order.
//!
//! Placeholders are `?` unless the `dollar_placeholders` feature is enabled, in
//! which case they are numbered `$1, $2, ...`.

use repokit_core::{Fetchable, Insertable, ParamValue, Predicate, Query, SortDirection, SortKey, Updatable};

/// Placeholder representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Dollar,   // $1, $2, ...
    Question, // ?
}

pub fn placeholder_style() -> Placeholder {
    #[cfg(feature = "dollar_placeholders")]
    return Placeholder::Dollar;

    #[cfg(not(feature = "dollar_placeholders"))]
    return Placeholder::Question;
}

fn placeholder_n(ph: Placeholder, n: usize) -> String {
    match ph {
        Placeholder::Dollar => format!("${}", n),
        Placeholder::Question => "?".to_string(),
    }
}

fn placeholders(ph: Placeholder, from: usize, count: usize) -> String {
    (from..from + count)
        .map(|n| placeholder_n(ph, n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build `SELECT <cols> FROM <table>`.
pub fn select_all<E: Fetchable>() -> String {
    format!(
        "SELECT {cols} FROM {table}",
        cols = E::SELECT_COLUMNS.join(", "),
        table = E::TABLE
    )
}

/// Build `SELECT ... WHERE <id> = <ph>`.
pub fn select_by_id<E: Fetchable>(id_column: &str) -> String {
    select_by_field::<E>(id_column)
}

/// Build `SELECT ... WHERE <field> = <ph>`.
pub fn select_by_field<E: Fetchable>(column: &str) -> String {
    format!(
        "{select} WHERE {column} = {ph}",
        select = select_all::<E>(),
        ph = placeholder_n(placeholder_style(), 1)
    )
}

/// Build `DELETE FROM <table> WHERE <id> = <ph>`.
pub fn delete_by_id<E: Fetchable>(id_column: &str) -> String {
    format!(
        "DELETE FROM {table} WHERE {id_column} = {ph}",
        table = E::TABLE,
        ph = placeholder_n(placeholder_style(), 1)
    )
}

/// Build `INSERT INTO <table> (<cols>) VALUES (<placeholders>)`.
/// With the `returning` feature, `RETURNING <id_column>` is appended.
pub fn insert<E>(id_column: &str) -> String
where
    E: Fetchable + Insertable,
{
    let mut sql = format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals})",
        table = E::TABLE,
        cols = E::INSERT_COLUMNS.join(", "),
        vals = placeholders(placeholder_style(), 1, E::INSERT_COLUMNS.len())
    );
    push_returning(&mut sql, id_column);
    sql
}

/// Build `INSERT INTO <table> (<cols>) VALUES (...), (...)` for `rows` rows.
/// Returns `None` when `rows` is zero.
pub fn insert_many<E>(rows: usize, id_column: &str) -> Option<String>
where
    E: Fetchable + Insertable,
{
    if rows == 0 {
        return None;
    }
    let style = placeholder_style();
    let width = E::INSERT_COLUMNS.len();
    let tuples = (0..rows)
        .map(|r| format!("({})", placeholders(style, r * width + 1, width)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({cols}) VALUES {tuples}",
        table = E::TABLE,
        cols = E::INSERT_COLUMNS.join(", "),
    );
    push_returning(&mut sql, id_column);
    Some(sql)
}

#[cfg(feature = "returning")]
fn push_returning(sql: &mut String, id_column: &str) {
    sql.push_str(" RETURNING ");
    sql.push_str(id_column);
}

#[cfg(not(feature = "returning"))]
fn push_returning(_sql: &mut String, _id_column: &str) {}

/// Build `UPDATE <table> SET <col1> = <ph1>, ... WHERE <id> = <phN>`.
pub fn update_by_id<E>(id_column: &str) -> String
where
    E: Fetchable + Updatable,
{
    let style = placeholder_style();
    let cols = E::UPDATE_COLUMNS;
    let assignments = cols
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = {}", placeholder_n(style, i + 1)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} SET {assignments} WHERE {id_column} = {ph}",
        table = E::TABLE,
        ph = placeholder_n(style, cols.len() + 1)
    )
}

/// Build `SELECT COUNT(*) FROM <table>`.
pub fn select_count_all<E: Fetchable>() -> String {
    format!("SELECT COUNT(*) FROM {table}", table = E::TABLE)
}

/// Escape `LIKE` wildcards so the needle matches literally (escape char `\`).
pub fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Render the AND-list of predicates as a `WHERE` clause, numbering placeholders
/// from `first`. Returns an empty clause when there are no predicates.
///
/// Equality against `NULL` renders as `IS NULL` and binds nothing.
pub fn render_where_from(predicates: &[Predicate], first: usize) -> (String, Vec<ParamValue>) {
    if predicates.is_empty() {
        return (String::new(), Vec::new());
    }
    let style = placeholder_style();
    let mut clauses = Vec::with_capacity(predicates.len());
    let mut params = Vec::with_capacity(predicates.len());
    for p in predicates {
        let ph = placeholder_n(style, first + params.len());
        match p {
            Predicate::Eq {
                column,
                value: ParamValue::Null,
                ..
            } => clauses.push(format!("{column} IS NULL")),
            Predicate::Eq { column, value, .. } => {
                clauses.push(format!("{column} = {ph}"));
                params.push(value.clone());
            }
            Predicate::Contains { column, needle, .. } => {
                clauses.push(format!("CAST({column} AS TEXT) LIKE {ph} ESCAPE '\\'"));
                params.push(ParamValue::String(format!("%{}%", escape_like(needle))));
            }
        }
    }
    (format!("WHERE {}", clauses.join(" AND ")), params)
}

pub fn render_where(predicates: &[Predicate]) -> (String, Vec<ParamValue>) {
    render_where_from(predicates, 1)
}

/// Render `ORDER BY a ASC, b DESC`; empty when there are no keys.
pub fn render_order_by(keys: &[SortKey]) -> String {
    if keys.is_empty() {
        return String::new();
    }
    let parts = keys
        .iter()
        .map(|k| {
            let dir = match k.direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            format!("{} {}", k.column, dir)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("ORDER BY {parts}")
}

/// Render `LIMIT n OFFSET m`. An offset without a limit uses `LIMIT -1`.
/// Both are clamped to `i64::MAX`, the largest integer SQLite parses.
pub fn render_window(offset: u64, limit: Option<u64>) -> String {
    let clamp = |n: u64| n.min(i64::MAX as u64);
    match (limit.map(clamp), clamp(offset)) {
        (None, 0) => String::new(),
        (Some(l), 0) => format!("LIMIT {l}"),
        (Some(l), off) => format!("LIMIT {l} OFFSET {off}"),
        (None, off) => format!("LIMIT -1 OFFSET {off}"),
    }
}

fn join_clauses(base: String, clauses: &[&str]) -> String {
    let mut sql = base;
    for c in clauses.iter().filter(|c| !c.is_empty()) {
        sql.push(' ');
        sql.push_str(c);
    }
    sql
}

/// Full `SELECT` for a query: predicates, ordering and window.
pub fn select_query<E: Fetchable>(query: &Query<E>) -> (String, Vec<ParamValue>) {
    let (where_sql, params) = render_where(query.predicates());
    let order_sql = render_order_by(query.order());
    let window_sql = render_window(query.offset(), query.limit());
    let sql = join_clauses(select_all::<E>(), &[&where_sql, &order_sql, &window_sql]);
    (sql, params)
}

/// `SELECT COUNT(*)` over the query's predicates; ordering and window are ignored.
pub fn count_query<E: Fetchable>(query: &Query<E>) -> (String, Vec<ParamValue>) {
    let (where_sql, params) = render_where(query.predicates());
    (join_clauses(select_count_all::<E>(), &[&where_sql]), params)
}

/// `DELETE` of every row matching the query's predicates.
pub fn delete_query<E: Fetchable>(query: &Query<E>) -> (String, Vec<ParamValue>) {
    let (where_sql, params) = render_where(query.predicates());
    let base = format!("DELETE FROM {table}", table = E::TABLE);
    (join_clauses(base, &[&where_sql]), params)
}
