use repokit_core::{Fetchable, Identifiable, Insertable, ParamValue, Record, Updatable};
use repokit_macros::Entity;

#[derive(Entity, Clone, Debug, Default, PartialEq)]
#[entity(table = "people")]
struct Person {
    #[fetch(id)]
    id: i64,
    #[fetch(column = "email_address")]
    email: String,
    #[fetch(column = "full_name")]
    name: String,
}

fn main() {
    assert_eq!(Person::TABLE, "people");
    assert_eq!(Person::SELECT_COLUMNS, &["id", "email_address", "full_name"]);
    assert_eq!(Person::INSERT_COLUMNS, &["email_address", "full_name"]);
    assert_eq!(Person::UPDATE_COLUMNS, &["email_address", "full_name"]);
    assert_eq!(Person::ID_COLUMN, "id");

    let p = Person { id: 3, email: "a@b".into(), name: "Ann".into() };
    assert_eq!(p.id(), Some(3));
    assert_eq!(
        p.update_values(),
        vec![ParamValue::from("a@b"), ParamValue::from("Ann"), ParamValue::I64(3)]
    );

    let reg = Person::fields();
    assert_eq!(reg.entity(), "Person");
    assert_eq!(reg.get("email").map(|f| f.column()), Some("email_address"));
    assert_eq!(reg.by_column("full_name").map(|f| f.name()), Some("name"));
}
