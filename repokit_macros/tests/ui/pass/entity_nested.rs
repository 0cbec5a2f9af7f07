use repokit_core::{Fetchable, FieldKind, ParamValue, Record};
use repokit_macros::Entity;

#[derive(Entity, Clone, Debug, Default, PartialEq)]
struct Customer {
    #[fetch(id)]
    id: Option<i64>,
    name: String,
}

#[derive(Entity, Clone, Debug, Default, PartialEq)]
struct OrderLine {
    #[fetch(id)]
    id: Option<i64>,
    customer_id: i64,
    #[fetch(nested)]
    customer: Customer,
}

fn main() {
    assert_eq!(OrderLine::TABLE, "order_lines");
    assert_eq!(OrderLine::SELECT_COLUMNS, &["id", "customer_id"]);

    let field = OrderLine::fields().get("customer").unwrap();
    assert_eq!(field.kind(), FieldKind::Record);
    assert!(!field.is_scalar());

    let line = OrderLine {
        id: Some(1),
        customer_id: 4,
        customer: Customer { id: Some(4), name: "Acme".into() },
    };
    let nested = field.nested_access().unwrap();
    let child = nested.resolve("NAME").unwrap();
    assert_eq!(nested.read(&line, child.name), Some(ParamValue::from("Acme")));
}
