use proptest::prelude::*;
use repokit_core::{Insertable, ParamValue, Query, SortOrder};
use repokit_macros::Entity;
use repokit_sql_builder::{placeholder_style, Placeholder};

#[derive(Entity, Debug, Clone, Default)]
#[entity(table = "people_props")]
struct PersonP {
    #[fetch(id)]
    id: i64,
    #[fetch(column = "email_address")]
    email: String,
    #[fetch(column = "full_name")]
    name: String,
    age: i32,
}

fn placeholder_count(sql: &str, params: usize) -> usize {
    match placeholder_style() {
        Placeholder::Question => sql.matches('?').count(),
        Placeholder::Dollar => (1..=params)
            .filter(|i| sql.contains(&format!("${}", i)))
            .count(),
    }
}

proptest! {
    #[test]
    fn insert_many_placeholder_count(rows in 1usize..10) {
        let sql = repokit_sql_builder::insert_many::<PersonP>(rows, "id").unwrap();
        let expected = rows * <PersonP as Insertable>::INSERT_COLUMNS.len();
        prop_assert_eq!(placeholder_count(&sql, expected), expected);
    }

    #[test]
    fn rendered_queries_bind_one_param_per_predicate(
        name in "[a-z]{0,8}",
        age in 0i32..120,
        use_name in any::<bool>(),
        use_age in any::<bool>(),
        page in 0u64..5,
    ) {
        let mut q = Query::<PersonP>::new();
        if use_name {
            q = q.filter("name", name.as_str()).unwrap();
        }
        if use_age {
            q = q.where_eq("age", age).0;
        }
        let q = q.sort_by_orders([SortOrder::desc("age"), SortOrder::asc("id")]).unwrap().page(page, 10);

        let (sql, params) = repokit_sql_builder::select_query(&q);
        prop_assert_eq!(params.len(), usize::from(use_name) + usize::from(use_age));
        prop_assert_eq!(placeholder_count(&sql, params.len()), params.len());
        prop_assert!(sql.contains("ORDER BY age DESC, id ASC LIMIT 10"));

        let (count_sql, count_params) = repokit_sql_builder::count_query(&q);
        prop_assert_eq!(count_params, params);
        prop_assert!(!count_sql.contains("ORDER BY") && !count_sql.contains("LIMIT"));
    }
}

#[test]
fn columns_come_from_attributes() {
    let (sql, params) =
        repokit_sql_builder::select_query(&Query::<PersonP>::new().filter("Email", "@x").unwrap());
    assert!(sql.starts_with("SELECT id, email_address, full_name, age FROM people_props WHERE"));
    assert!(sql.contains("CAST(email_address AS TEXT) LIKE"));
    assert_eq!(params, vec![ParamValue::String("%@x%".into())]);
}
