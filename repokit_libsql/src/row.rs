use std::marker::PhantomData;

use libsql::{Row, Value};
use repokit_core::{ParamValue, Record, RepoError, RepoResult, RowAdapter};

/// Convert a [`ParamValue`] into a libsql value. Booleans are stored as 0/1.
pub fn to_libsql_value(p: ParamValue) -> Value {
    match p {
        ParamValue::String(s) => s.into(),
        ParamValue::I32(i) => (i as i64).into(),
        ParamValue::I64(i) => i.into(),
        ParamValue::F64(f) => f.into(),
        ParamValue::Bool(b) => (b as i64).into(),
        ParamValue::Null => Value::Null,
    }
}

pub(crate) fn to_libsql_values(params: Vec<ParamValue>) -> Vec<Value> {
    params.into_iter().map(to_libsql_value).collect()
}

/// Convert a libsql value into a [`ParamValue`]. Blobs are not supported.
pub fn from_libsql_value(column: &str, v: Value) -> RepoResult<ParamValue> {
    Ok(match v {
        Value::Null => ParamValue::Null,
        Value::Integer(i) => ParamValue::I64(i),
        Value::Real(f) => ParamValue::F64(f),
        Value::Text(s) => ParamValue::String(s),
        Value::Blob(_) => {
            return Err(RepoError::mapping(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("column `{column}` holds a blob"),
            )))
        }
    })
}

/// Maps a row onto any `Record + Default` by matching column names against the
/// entity's field registry. Unknown columns are ignored; fields without a
/// column in the row keep their default value.
pub struct RecordRowAdapter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> RecordRowAdapter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for RecordRowAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RecordRowAdapter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RecordRowAdapter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecordRowAdapter")
    }
}

impl<T> RowAdapter<T> for RecordRowAdapter<T>
where
    T: Record + Default,
{
    type Row = Row;

    fn from_row(&self, row: &Row) -> RepoResult<T> {
        let registry = T::fields();
        let mut entity = T::default();
        for idx in 0..row.column_count() {
            let Some(name) = row.column_name(idx) else {
                continue;
            };
            let Some(field) = registry.by_column(name) else {
                continue;
            };
            let value = row.get_value(idx).map_err(RepoError::mapping)?;
            let value = from_libsql_value(name, value)?;
            if !field.set(&mut entity, value)? {
                tracing::trace!(entity = registry.entity(), column = name, "read-only field left unset");
            }
        }
        Ok(entity)
    }
}
