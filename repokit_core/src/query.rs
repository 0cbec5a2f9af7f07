//! Backend-agnostic query description built from runtime field names.
//!
//! A [`Query`] is an AND-list of predicates, an ordered list of sort keys and
//! an offset/limit window. Field names are resolved through the entity's
//! [`FieldRegistry`](crate::FieldRegistry) when a clause is added, so a
//! finished query only refers to columns that exist. Backends render it to SQL;
//! [`Query::apply`] evaluates it over an in-memory sequence with the same
//! semantics.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::record::{Field, Record};
use crate::value::{contains_ignore_case, sort_cmp, sql_eq, CoerceError, FieldKind, ParamValue};

/// Errors raised while building a query from names and loosely typed values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("{entity} has no field named `{field}`")]
    UnknownField { entity: &'static str, field: String },
    #[error("`{entity}.{field}` holds a record and cannot be filtered or sorted on")]
    NotScalar {
        entity: &'static str,
        field: &'static str,
    },
    #[error("value for `{field}` does not convert to the field type")]
    Coerce {
        field: &'static str,
        #[source]
        source: CoerceError,
    },
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error("invalid sort order `{0}`")]
    InvalidSortOrder(String),
}

/// One condition of a query's WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`
    Eq {
        field: &'static str,
        column: &'static str,
        value: ParamValue,
    },
    /// `column LIKE '%needle%'`
    Contains {
        field: &'static str,
        column: &'static str,
        needle: String,
    },
}

impl Predicate {
    pub fn field(&self) -> &'static str {
        match self {
            Predicate::Eq { field, .. } | Predicate::Contains { field, .. } => field,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Predicate::Eq { column, .. } | Predicate::Contains { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Exactly `asc` is ascending; every other value, `Asc` included, is
    /// descending.
    pub fn parse_lenient(s: &str) -> Self {
        if s.trim() == "asc" {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        }
    }
}

/// A resolved ORDER BY key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: &'static str,
    pub column: &'static str,
    pub direction: SortDirection,
}

/// An unresolved sort request, as received from a caller.
///
/// Parses from `name`, `name:asc` or `name:desc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub field: String,
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Build from a `{ "orderBy": .., "orderType": .. }` map.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, QueryError> {
        let field = map
            .get("orderBy")
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| QueryError::InvalidSortOrder(format!("{map:?}")))?;
        let direction = map
            .get("orderType")
            .ok_or_else(|| QueryError::InvalidSortOrder(format!("{map:?}")))?;
        Ok(Self {
            field: field.trim().to_owned(),
            direction: SortDirection::parse_lenient(direction),
        })
    }
}

impl FromStr for SortOrder {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.split_once(':') {
            Some((f, d)) => (f.trim(), SortDirection::parse_lenient(d)),
            None => (s.trim(), SortDirection::Ascending),
        };
        if field.is_empty() {
            return Err(QueryError::InvalidSortOrder(s.to_owned()));
        }
        Ok(Self {
            field: field.to_owned(),
            direction,
        })
    }
}

/// Query over entities of type `T`.
pub struct Query<T> {
    predicates: Vec<Predicate>,
    order: Vec<SortKey>,
    offset: u64,
    limit: Option<u64>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            order: self.order.clone(),
            offset: self.offset,
            limit: self.limit,
            _entity: PhantomData,
        }
    }
}

impl<T> PartialEq for Query<T> {
    fn eq(&self, other: &Self) -> bool {
        self.predicates == other.predicates
            && self.order == other.order
            && self.offset == other.offset
            && self.limit == other.limit
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("predicates", &self.predicates)
            .field("order", &self.order)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
            _entity: PhantomData,
        }
    }
}

impl<T> Query<T> {
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Skip `n` more rows. Applied after a `take`, the window shrinks accordingly.
    pub fn skip(mut self, n: u64) -> Self {
        self.offset = self.offset.saturating_add(n);
        self.limit = self.limit.map(|l| l.saturating_sub(n));
        self
    }

    /// Return at most `n` rows; never widens an existing limit.
    pub fn take(mut self, n: u64) -> Self {
        self.limit = Some(self.limit.map_or(n, |l| l.min(n)));
        self
    }

    /// Window for a 1-based page number. Page 0 is treated as page 1.
    pub fn page(self, page: u64, limit: u64) -> Self {
        let skip = page.max(1).saturating_sub(1).saturating_mul(limit);
        self.skip(skip).take(limit)
    }

    /// The same filter and ordering with the window removed.
    pub fn unwindowed(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            order: self.order.clone(),
            offset: 0,
            limit: None,
            _entity: PhantomData,
        }
    }

    /// The same filter without ordering or window, as used for counting.
    pub fn unpaged(&self) -> Self {
        Self {
            order: Vec::new(),
            ..self.unwindowed()
        }
    }
}

fn resolve<T: Record>(name: &str) -> Result<&'static Field<T>, QueryError> {
    let registry = T::fields();
    let field = registry
        .get_ignore_case(name)
        .ok_or_else(|| QueryError::UnknownField {
            entity: registry.entity(),
            field: name.to_owned(),
        })?;
    if !field.is_scalar() {
        return Err(QueryError::NotScalar {
            entity: registry.entity(),
            field: field.name(),
        });
    }
    Ok(field)
}

fn key<T>(field: &Field<T>, direction: SortDirection) -> SortKey {
    SortKey {
        field: field.name(),
        column: field.column(),
        direction,
    }
}

impl<T: Record> Query<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `field = value` if the field exists (exact name) and the value
    /// converts to its type. A null value on a nullable field matches rows
    /// where the field is null. Never fails: the boolean reports whether the
    /// predicate was added, and on `false` the query comes back unchanged.
    pub fn where_eq(mut self, field: &str, value: impl Into<ParamValue>) -> (Self, bool) {
        let registry = T::fields();
        let Some(f) = registry.get(field).filter(|f| f.is_scalar()) else {
            tracing::debug!(entity = registry.entity(), field, "where_eq: no such field");
            return (self, false);
        };
        match value.into().coerce(f.kind(), f.nullable()) {
            Ok(value) => {
                self.predicates.push(Predicate::Eq {
                    field: f.name(),
                    column: f.column(),
                    value,
                });
                (self, true)
            }
            Err(error) => {
                tracing::debug!(entity = registry.entity(), field, %error, "where_eq: value rejected");
                (self, false)
            }
        }
    }

    /// Fuzzy filter on one field. Boolean fields match `value == "true"`
    /// exactly; every other field matches when its text contains `value`
    /// converted to the field type, so `" 30"` on a number looks for `30`.
    pub fn filter(mut self, field: &str, value: impl Into<ParamValue>) -> Result<Self, QueryError> {
        let f = resolve::<T>(field)?;
        let raw = value.into();
        let coerced = raw
            .clone()
            .coerce(f.kind(), f.nullable())
            .map_err(|source| QueryError::Coerce {
                field: f.name(),
                source,
            })?;
        let predicate = if f.kind() == FieldKind::Bool {
            let flag = match &raw {
                ParamValue::String(s) => ParamValue::Bool(s == "true"),
                _ => coerced,
            };
            Predicate::Eq {
                field: f.name(),
                column: f.column(),
                value: flag,
            }
        } else {
            Predicate::Contains {
                field: f.name(),
                column: f.column(),
                needle: if coerced.is_null() {
                    String::new()
                } else {
                    coerced.to_string()
                },
            }
        };
        self.predicates.push(predicate);
        Ok(self)
    }

    /// Order by one field ascending, replacing any earlier ordering.
    /// An empty name leaves the query untouched.
    pub fn sort_by(self, field: &str) -> Result<Self, QueryError> {
        self.order_by(field, SortDirection::Ascending)
    }

    pub fn sort_by_descending(self, field: &str) -> Result<Self, QueryError> {
        self.order_by(field, SortDirection::Descending)
    }

    fn order_by(mut self, field: &str, direction: SortDirection) -> Result<Self, QueryError> {
        if field.trim().is_empty() {
            return Ok(self);
        }
        let f = resolve::<T>(field.trim())?;
        self.order = vec![key(f, direction)];
        Ok(self)
    }

    /// Append a secondary ordering key.
    pub fn then_by(mut self, field: &str, direction: SortDirection) -> Result<Self, QueryError> {
        if field.trim().is_empty() {
            return Ok(self);
        }
        let f = resolve::<T>(field.trim())?;
        self.order.push(key(f, direction));
        Ok(self)
    }

    /// Ascending order by each name in turn: the first replaces any existing
    /// ordering, the rest break ties.
    pub fn sort_by_keys<I, S>(self, fields: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sort_by_orders(fields.into_iter().map(|f| SortOrder::asc(f.as_ref())))
    }

    /// Multi-key ordering with a direction per key. An empty list leaves the
    /// query untouched.
    pub fn sort_by_orders<I>(mut self, orders: I) -> Result<Self, QueryError>
    where
        I: IntoIterator,
        I::Item: std::borrow::Borrow<SortOrder>,
    {
        use std::borrow::Borrow;

        let mut keys = Vec::new();
        for order in orders {
            let order: &SortOrder = order.borrow();
            if order.field.trim().is_empty() {
                continue;
            }
            let f = resolve::<T>(order.field.trim())?;
            keys.push(key(f, order.direction));
        }
        if !keys.is_empty() {
            self.order = keys;
        }
        Ok(self)
    }

    /// Whether `item` satisfies every predicate.
    pub fn matches(&self, item: &T) -> bool {
        let registry = T::fields();
        self.predicates.iter().all(|p| {
            let value = registry
                .get(p.field())
                .and_then(|f| f.get(item))
                .unwrap_or(ParamValue::Null);
            match p {
                Predicate::Eq {
                    value: ParamValue::Null,
                    ..
                } => value.is_null(),
                Predicate::Eq { value: wanted, .. } => sql_eq(&value, wanted),
                Predicate::Contains { needle, .. } => contains_ignore_case(&value, needle),
            }
        })
    }

    fn compare(&self, a: &T, b: &T) -> Ordering {
        let registry = T::fields();
        for key in &self.order {
            let Some(field) = registry.get(key.field) else {
                continue;
            };
            let (x, y) = (
                field.get(a).unwrap_or(ParamValue::Null),
                field.get(b).unwrap_or(ParamValue::Null),
            );
            let ord = match key.direction {
                SortDirection::Ascending => sort_cmp(&x, &y),
                SortDirection::Descending => sort_cmp(&y, &x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Evaluate the query over an in-memory sequence. Sorting is stable.
    pub fn apply(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut rows: Vec<T> = items.into_iter().filter(|i| self.matches(i)).collect();
        if !self.order.is_empty() {
            rows.sort_by(|a, b| self.compare(a, b));
        }
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        rows.into_iter().skip(offset).take(limit).collect()
    }

    /// Number of items matching the predicates; the window is ignored.
    pub fn count_in<'a>(&self, items: impl IntoIterator<Item = &'a T>) -> u64
    where
        T: 'a,
    {
        items.into_iter().filter(|i| self.matches(i)).count() as u64
    }
}
