//! Typed field accessor registry.
//!
//! Every entity exposes a [`FieldRegistry`] built once per type by the
//! `Entity` derive. Dynamic filters, sort keys, projections and row mapping
//! all resolve field names through it instead of inspecting types at runtime.

use std::collections::HashMap;
use std::fmt;

use crate::value::{CoerceError, FieldKind, FieldValue, ParamValue};

/// Reads a field as a parameter value.
pub type Getter<T> = fn(&T) -> ParamValue;
/// Writes a field from a parameter value, coercing it to the field type.
pub type Setter<T> = fn(&mut T, ParamValue) -> Result<(), CoerceError>;

/// A field of a nested record, as seen from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

/// Descent into a field whose type is itself a [`Record`].
pub struct Nested<T> {
    resolve: fn(&str) -> Option<NestedField>,
    read: fn(&T, &str) -> Option<ParamValue>,
}

impl<T> Nested<T> {
    /// `read` returns the named child field of the nested value held by `T`.
    pub fn of<C: Record>(read: fn(&T, &str) -> Option<ParamValue>) -> Self {
        Self {
            resolve: resolve_child::<C>,
            read,
        }
    }

    /// Look up a scalar field of the nested record, ignoring ASCII case.
    pub fn resolve(&self, name: &str) -> Option<NestedField> {
        (self.resolve)(name)
    }

    pub fn read(&self, parent: &T, child: &str) -> Option<ParamValue> {
        (self.read)(parent, child)
    }

    pub(crate) fn reader(&self) -> fn(&T, &str) -> Option<ParamValue> {
        self.read
    }
}

fn resolve_child<C: Record>(name: &str) -> Option<NestedField> {
    C::fields()
        .get_ignore_case(name)
        .filter(|f| f.is_scalar())
        .map(|f| NestedField {
            name: f.name(),
            kind: f.kind(),
            nullable: f.nullable(),
        })
}

enum Access<T> {
    Scalar {
        get: Getter<T>,
        set: Option<Setter<T>>,
    },
    Nested(Nested<T>),
}

/// One named field of an entity.
pub struct Field<T> {
    name: &'static str,
    column: &'static str,
    kind: FieldKind,
    nullable: bool,
    access: Access<T>,
}

impl<T> Field<T> {
    /// A column-backed field; read-only until [`Field::writable`] is applied.
    pub fn scalar(
        name: &'static str,
        column: &'static str,
        kind: FieldKind,
        nullable: bool,
        get: Getter<T>,
    ) -> Self {
        Self {
            name,
            column,
            kind,
            nullable,
            access: Access::Scalar { get, set: None },
        }
    }

    /// Shorthand for a scalar field whose kind comes from its Rust type.
    pub fn of<V: FieldValue>(name: &'static str, column: &'static str, get: Getter<T>) -> Self {
        Self::scalar(name, column, V::KIND, V::NULLABLE, get)
    }

    pub fn writable(mut self, setter: Setter<T>) -> Self {
        if let Access::Scalar { set, .. } = &mut self.access {
            *set = Some(setter);
        }
        self
    }

    /// A field holding another record. It has no column and cannot be
    /// filtered or sorted on.
    pub fn nested(name: &'static str, nested: Nested<T>) -> Self {
        Self {
            name,
            column: name,
            kind: FieldKind::Record,
            nullable: false,
            access: Access::Nested(nested),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.access, Access::Scalar { .. })
    }

    pub fn is_writable(&self) -> bool {
        self.setter().is_some()
    }

    pub fn getter(&self) -> Option<Getter<T>> {
        match &self.access {
            Access::Scalar { get, .. } => Some(*get),
            Access::Nested(_) => None,
        }
    }

    pub fn setter(&self) -> Option<Setter<T>> {
        match &self.access {
            Access::Scalar { set, .. } => *set,
            Access::Nested(_) => None,
        }
    }

    pub fn nested_access(&self) -> Option<&Nested<T>> {
        match &self.access {
            Access::Nested(n) => Some(n),
            Access::Scalar { .. } => None,
        }
    }

    pub fn get(&self, target: &T) -> Option<ParamValue> {
        self.getter().map(|get| get(target))
    }

    /// Assign `value` to this field. Returns `Ok(false)` for read-only fields.
    pub fn set(&self, target: &mut T, value: ParamValue) -> Result<bool, CoerceError> {
        match self.setter() {
            Some(set) => set(target, value).map(|()| true),
            None => Ok(false),
        }
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// Ordered set of an entity's fields with a name index.
pub struct FieldRegistry<T> {
    entity: &'static str,
    fields: Vec<Field<T>>,
    index: HashMap<&'static str, usize>,
}

impl<T> FieldRegistry<T> {
    pub fn new(entity: &'static str, fields: Vec<Field<T>>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name, i))
            .collect();
        Self {
            entity,
            fields,
            index,
        }
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Field<T>> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Exact lookup first, then the first field whose name matches ignoring ASCII case.
    pub fn get_ignore_case(&self, name: &str) -> Option<&Field<T>> {
        self.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn by_column(&self, column: &str) -> Option<&Field<T>> {
        self.fields
            .iter()
            .filter(|f| f.is_scalar())
            .find(|f| f.column.eq_ignore_ascii_case(column))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field<T>> {
        self.fields.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<T> fmt::Debug for FieldRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRegistry")
            .field("entity", &self.entity)
            .field("fields", &self.fields)
            .finish()
    }
}

/// An entity whose fields can be addressed by name.
/// Implemented by `#[derive(Entity)]`.
pub trait Record: Sized + 'static {
    fn fields() -> &'static FieldRegistry<Self>;

    fn get_field(&self, name: &str) -> Option<ParamValue> {
        Self::fields().get(name).and_then(|f| f.get(self))
    }

    /// Read a field converted to `V`; `None` when the field is missing or
    /// does not convert.
    fn field_value<V: FieldValue>(&self, name: &str) -> Option<V> {
        self.get_field(name).and_then(|v| V::from_param(v).ok())
    }

    /// Returns `Ok(false)` when the field is unknown or read-only.
    fn set_field(&mut self, name: &str, value: ParamValue) -> Result<bool, CoerceError> {
        match Self::fields().get(name) {
            Some(field) => field.set(self, value),
            None => Ok(false),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn lookups_by_name_case_and_column() {
        let reg = Person::fields();
        assert_eq!(reg.entity(), "Person");
        assert_eq!(reg.len(), 5);
        assert!(reg.get("Age").is_none());
        assert_eq!(reg.get_ignore_case("Age").map(|f| f.name()), Some("age"));
        assert_eq!(reg.by_column("IS_ACTIVE").map(|f| f.name()), Some("active"));
        assert!(reg.by_column("customer").is_none());
        assert_eq!(
            reg.names().collect::<Vec<_>>(),
            ["id", "name", "age", "active", "customer"]
        );
    }

    #[test]
    fn get_and_set_through_registry() {
        let mut p = person(1, "Ann", 30, true);
        assert_eq!(p.get_field("age"), Some(ParamValue::I32(30)));
        assert_eq!(p.field_value::<i64>("age"), Some(30));
        assert_eq!(p.field_value::<i32>("missing"), None);

        assert_eq!(p.set_field("age", ParamValue::from("31")), Ok(true));
        assert_eq!(p.age, 31);
        // id has no setter
        assert_eq!(p.set_field("id", ParamValue::I64(9)), Ok(false));
        assert_eq!(p.id, 1);
        assert!(p.set_field("age", ParamValue::from("old")).is_err());
    }

    #[test]
    fn nested_fields_resolve_children_ignoring_case() {
        let field = Person::fields().get("customer").unwrap();
        assert!(!field.is_scalar());
        assert_eq!(field.kind(), FieldKind::Record);
        let nested = field.nested_access().unwrap();
        let child = nested.resolve("Name").unwrap();
        assert_eq!(child.name, "name");
        assert_eq!(child.kind, FieldKind::String);
        assert!(nested.resolve("missing").is_none());

        let p = person(2, "Bo", 40, false);
        assert_eq!(
            nested.read(&p, child.name),
            Some(ParamValue::from("Bo Ltd"))
        );
    }
}
