//! Scalar values exchanged between entities, queries and backends.
//!
//! [`ParamValue`] is the only value shape the rest of the workspace passes
//! around. Entity fields declare a [`FieldKind`] and convert through
//! [`FieldValue`]; loosely typed input (strings from a query string, numbers
//! from a JSON body) is brought to the declared kind with
//! [`ParamValue::coerce`].

use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::fmt;
use std::num::IntErrorKind;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A backend-agnostic representation of a database parameter value.
/// This is used to pass entity field values from generated code to backend adapters
/// without making `repokit_core` dependent on a specific database driver.
///
/// Dates travel as `String` in their canonical text form (`2024-01-31`,
/// `2024-01-31 08:15:00`), which is also how the SQLite backend stores them.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    Null,
}

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    I32,
    I64,
    F64,
    Bool,
    Date,
    DateTime,
    /// A field holding another record; only reachable through nested projection.
    Record,
}

/// Why a value could not be brought to a field's declared kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoerceError {
    #[error("cannot convert a {from} value to {to:?}")]
    InvalidCast { from: &'static str, to: FieldKind },
    #[error("`{value}` is not a valid {to:?}")]
    Format { value: String, to: FieldKind },
    #[error("`{value}` is out of range for {to:?}")]
    Overflow { value: String, to: FieldKind },
    #[error("null is not allowed for a non-nullable {to:?} field")]
    Null { to: FieldKind },
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::String(_) => "string",
            ParamValue::I32(_) => "i32",
            ParamValue::I64(_) => "i64",
            ParamValue::F64(_) => "f64",
            ParamValue::Bool(_) => "bool",
            ParamValue::Null => "null",
        }
    }

    /// Convert this value to the representation used for `kind`.
    ///
    /// Strings are parsed (numbers, `true`/`false` in any case, ISO dates),
    /// numbers convert between widths with range checks, and floats round half
    /// to even when narrowed to integers. `Null` is accepted only when
    /// `nullable` is set.
    pub fn coerce(self, kind: FieldKind, nullable: bool) -> Result<ParamValue, CoerceError> {
        if self.is_null() {
            return if nullable {
                Ok(ParamValue::Null)
            } else {
                Err(CoerceError::Null { to: kind })
            };
        }
        match kind {
            FieldKind::String => Ok(ParamValue::String(self.to_string())),
            FieldKind::I32 => {
                let n = self.to_i64(kind)?;
                i32::try_from(n)
                    .map(ParamValue::I32)
                    .map_err(|_| CoerceError::Overflow {
                        value: n.to_string(),
                        to: kind,
                    })
            }
            FieldKind::I64 => self.to_i64(kind).map(ParamValue::I64),
            FieldKind::F64 => self.to_f64(kind).map(ParamValue::F64),
            FieldKind::Bool => self.to_bool(kind).map(ParamValue::Bool),
            FieldKind::Date => {
                let text = self.date_text(kind)?;
                parse_date(&text)
                    .map(|d| ParamValue::String(d.format(DATE_FORMAT).to_string()))
                    .ok_or(CoerceError::Format {
                        value: text,
                        to: kind,
                    })
            }
            FieldKind::DateTime => {
                let text = self.date_text(kind)?;
                parse_datetime(&text)
                    .map(|d| ParamValue::String(d.format(DATETIME_FORMAT).to_string()))
                    .ok_or(CoerceError::Format {
                        value: text,
                        to: kind,
                    })
            }
            FieldKind::Record => Err(CoerceError::InvalidCast {
                from: self.type_name(),
                to: kind,
            }),
        }
    }

    fn to_i64(&self, kind: FieldKind) -> Result<i64, CoerceError> {
        match self {
            ParamValue::I32(n) => Ok(i64::from(*n)),
            ParamValue::I64(n) => Ok(*n),
            ParamValue::Bool(b) => Ok(i64::from(*b)),
            ParamValue::F64(f) => {
                let rounded = f.round_ties_even();
                // i64::MAX is not representable; the bound is exclusive.
                if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64 {
                    Ok(rounded as i64)
                } else {
                    Err(CoerceError::Overflow {
                        value: f.to_string(),
                        to: kind,
                    })
                }
            }
            ParamValue::String(s) => s.trim().parse::<i64>().map_err(|e| match e.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => CoerceError::Overflow {
                    value: s.clone(),
                    to: kind,
                },
                _ => CoerceError::Format {
                    value: s.clone(),
                    to: kind,
                },
            }),
            ParamValue::Null => Err(CoerceError::Null { to: kind }),
        }
    }

    fn to_f64(&self, kind: FieldKind) -> Result<f64, CoerceError> {
        match self {
            ParamValue::I32(n) => Ok(f64::from(*n)),
            ParamValue::I64(n) => Ok(*n as f64),
            ParamValue::F64(f) => Ok(*f),
            ParamValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            ParamValue::String(s) => s.trim().parse::<f64>().map_err(|_| CoerceError::Format {
                value: s.clone(),
                to: kind,
            }),
            ParamValue::Null => Err(CoerceError::Null { to: kind }),
        }
    }

    fn to_bool(&self, kind: FieldKind) -> Result<bool, CoerceError> {
        match self {
            ParamValue::Bool(b) => Ok(*b),
            ParamValue::I32(n) => Ok(*n != 0),
            ParamValue::I64(n) => Ok(*n != 0),
            ParamValue::F64(f) => Ok(*f != 0.0),
            ParamValue::String(s) => {
                let t = s.trim();
                if t.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if t.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(CoerceError::Format {
                        value: s.clone(),
                        to: kind,
                    })
                }
            }
            ParamValue::Null => Err(CoerceError::Null { to: kind }),
        }
    }

    fn date_text(&self, kind: FieldKind) -> Result<String, CoerceError> {
        match self {
            ParamValue::String(s) => Ok(s.clone()),
            other => Err(CoerceError::InvalidCast {
                from: other.type_name(),
                to: kind,
            }),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => f.write_str(s),
            ParamValue::I32(n) => write!(f, "{n}"),
            ParamValue::I64(n) => write!(f, "{n}"),
            ParamValue::F64(n) => write!(f, "{n}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Null => f.write_str("NULL"),
        }
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_owned())
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::I32(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::I64(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::F64(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl<V: Into<ParamValue>> From<Option<V>> for ParamValue {
    fn from(v: Option<V>) -> Self {
        v.map_or(ParamValue::Null, Into::into)
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

pub(crate) fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Typed bridge between a Rust field type and [`ParamValue`].
///
/// The `Entity` derive uses this to build field getters and setters, so any
/// field type used in an entity must implement it.
pub trait FieldValue: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_param(&self) -> ParamValue;

    /// Build a value from a parameter, coercing it to [`Self::KIND`] first.
    fn from_param(value: ParamValue) -> Result<Self, CoerceError>;
}

fn unexpected(value: &ParamValue, to: FieldKind) -> CoerceError {
    CoerceError::InvalidCast {
        from: value.type_name(),
        to,
    }
}

macro_rules! scalar_field_value {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl FieldValue for $ty {
            const KIND: FieldKind = FieldKind::$kind;

            fn to_param(&self) -> ParamValue {
                ParamValue::$variant(self.clone())
            }

            fn from_param(value: ParamValue) -> Result<Self, CoerceError> {
                match value.coerce(Self::KIND, false)? {
                    ParamValue::$variant(v) => Ok(v),
                    other => Err(unexpected(&other, Self::KIND)),
                }
            }
        }
    };
}

scalar_field_value!(String, String, String);
scalar_field_value!(i32, I32, I32);
scalar_field_value!(i64, I64, I64);
scalar_field_value!(f64, F64, F64);
scalar_field_value!(bool, Bool, Bool);

impl FieldValue for NaiveDate {
    const KIND: FieldKind = FieldKind::Date;

    fn to_param(&self) -> ParamValue {
        ParamValue::String(self.format(DATE_FORMAT).to_string())
    }

    fn from_param(value: ParamValue) -> Result<Self, CoerceError> {
        match value.coerce(Self::KIND, false)? {
            ParamValue::String(s) => parse_date(&s).ok_or(CoerceError::Format {
                value: s,
                to: Self::KIND,
            }),
            other => Err(unexpected(&other, Self::KIND)),
        }
    }
}

impl FieldValue for NaiveDateTime {
    const KIND: FieldKind = FieldKind::DateTime;

    fn to_param(&self) -> ParamValue {
        ParamValue::String(self.format(DATETIME_FORMAT).to_string())
    }

    fn from_param(value: ParamValue) -> Result<Self, CoerceError> {
        match value.coerce(Self::KIND, false)? {
            ParamValue::String(s) => parse_datetime(&s).ok_or(CoerceError::Format {
                value: s,
                to: Self::KIND,
            }),
            other => Err(unexpected(&other, Self::KIND)),
        }
    }
}

impl<V: FieldValue> FieldValue for Option<V> {
    const KIND: FieldKind = V::KIND;
    const NULLABLE: bool = true;

    fn to_param(&self) -> ParamValue {
        self.as_ref().map_or(ParamValue::Null, FieldValue::to_param)
    }

    fn from_param(value: ParamValue) -> Result<Self, CoerceError> {
        if value.is_null() {
            Ok(None)
        } else {
            V::from_param(value).map(Some)
        }
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn numeric(v: &ParamValue) -> Option<Num> {
    match v {
        ParamValue::I32(n) => Some(Num::Int(i64::from(*n))),
        ParamValue::I64(n) => Some(Num::Int(*n)),
        ParamValue::F64(f) => Some(Num::Float(*f)),
        ParamValue::Bool(b) => Some(Num::Int(i64::from(*b))),
        _ => None,
    }
}

fn cmp_num(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (Num::Int(x), Num::Float(y)) => (x as f64).partial_cmp(&y),
        (Num::Float(x), Num::Int(y)) => x.partial_cmp(&(y as f64)),
        (Num::Float(x), Num::Float(y)) => x.partial_cmp(&y),
    }
}

/// Equality with relational null semantics: `NULL` equals nothing, not even
/// `NULL`. Numbers compare by value across widths; booleans compare as 0/1.
pub fn sql_eq(a: &ParamValue, b: &ParamValue) -> bool {
    match (a, b) {
        (ParamValue::Null, _) | (_, ParamValue::Null) => false,
        (ParamValue::String(x), ParamValue::String(y)) => x == y,
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => cmp_num(x, y) == Some(Ordering::Equal),
            _ => false,
        },
    }
}

/// Total order matching SQLite's storage-class ordering: nulls first, then
/// numbers by value, then strings by byte order.
pub fn sort_cmp(a: &ParamValue, b: &ParamValue) -> Ordering {
    fn rank(v: &ParamValue) -> u8 {
        match v {
            ParamValue::Null => 0,
            ParamValue::String(_) => 2,
            _ => 1,
        }
    }
    match (a, b) {
        (ParamValue::String(x), ParamValue::String(y)) => x.cmp(y),
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => cmp_num(x, y).unwrap_or(Ordering::Equal),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

/// In-memory counterpart of `column LIKE '%needle%'` (ASCII case-insensitive).
pub fn contains_ignore_case(haystack: &ParamValue, needle: &str) -> bool {
    if haystack.is_null() {
        return false;
    }
    haystack
        .to_string()
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}
