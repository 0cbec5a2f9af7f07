use model::Article;
use repokit_core::{Fetchable, FieldKind, Identifiable, Insertable, ParamValue, Record};

mod model {
    use repokit_macros::Entity;

    #[derive(Entity, Clone, Debug, Default, PartialEq)]
    pub struct Article {
        #[fetch(id)]
        pub id: Option<i64>,
        pub title: String,
        pub subtitle: Option<String>,
        pub r#type: i32,
        #[fetch(skip)]
        pub cached_html: String,
    }
}

fn main() {
    // Pluralized snake_case table name
    assert_eq!(Article::TABLE, "articles");
    assert_eq!(Article::SELECT_COLUMNS, &["id", "title", "subtitle", "type"]);

    let mut a = Article { id: None, title: "t".into(), ..Article::default() };
    let id: Option<<Article as Identifiable>::Key> = a.id();
    assert_eq!(id, None);
    assert_eq!(
        a.insert_values(),
        vec![ParamValue::from("t"), ParamValue::Null, ParamValue::I32(0)]
    );

    let subtitle = Article::fields().get("subtitle").unwrap();
    assert_eq!(subtitle.kind(), FieldKind::String);
    assert!(subtitle.nullable());
    assert!(Article::fields().get("cached_html").is_none());

    assert_eq!(a.set_field("type", ParamValue::from("7")), Ok(true));
    assert_eq!(a.set_field("id", ParamValue::I64(9)), Ok(true));
    assert_eq!(a.r#type, 7);
    assert_eq!(a.id, Some(9));
}
