//! Common integration testing utilities and generic tests reusable across backends.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use repokit_core::value::sql_eq;
use repokit_core::{
    Identifiable, ParamValue, Query, QueryError, QuerySource, Record, RepoError, RepoResult,
    Repository,
};
use repokit_macros::Entity;

#[derive(Entity, Clone, Debug, Default, PartialEq)]
pub struct Customer {
    #[fetch(id)]
    pub id: Option<i64>,
    pub name: String,
    #[fetch(column = "email_address")]
    pub email: Option<String>,
}

#[derive(Entity, Clone, Debug, Default, PartialEq)]
pub struct Order {
    #[fetch(id)]
    pub id: Option<i64>,
    pub customer_id: i64,
    pub product: String,
    pub quantity: i32,
    #[fetch(column = "unit_price")]
    pub price: f64,
    pub shipped: bool,
    pub placed_on: NaiveDate,
    /// Filled in by joins; never stored.
    #[fetch(nested)]
    pub customer: Customer,
}

/// Flattened view of an order, built by projection from [`Order`].
#[derive(Entity, Clone, Debug, Default, PartialEq)]
#[entity(table = "order_summaries")]
pub struct OrderSummary {
    #[fetch(id)]
    pub id: Option<i64>,
    pub product: String,
    pub quantity: i32,
    pub customer_name: String,
    pub customer_email: Option<String>,
}

pub fn customer(name: &str, email: Option<&str>) -> Customer {
    Customer {
        id: None,
        name: name.to_owned(),
        email: email.map(str::to_owned),
    }
}

pub fn order(customer_id: i64, product: &str, quantity: i32, price: f64, shipped: bool) -> Order {
    Order {
        id: None,
        customer_id,
        product: product.to_owned(),
        quantity,
        price,
        shipped,
        placed_on: NaiveDate::from_ymd_opt(2024, 3, quantity.clamp(1, 28) as u32).unwrap_or_default(),
        customer: Customer::default(),
    }
}

/// Expose migration SQL via constants for harnesses.
pub mod migrations {
    pub const LIBSQL_SCHEMA_SQL: &str = include_str!("../migrations/libsql/001_schema.sql");
}

/// A repository that can also evaluate queries.
pub trait Store<T: Identifiable + Record + Send + Sync>: Repository<T> + QuerySource<T> {}

impl<T, S> Store<T> for S
where
    T: Identifiable + Record + Send + Sync,
    S: Repository<T> + QuerySource<T>,
{
}

#[async_trait]
pub trait RepoFactory {
    /// Construct a clean store connected to a DB with the required schema.
    async fn new_customer_store(&self) -> RepoResult<Box<dyn Store<Customer>>>;
}

/// Generic CRUD roundtrip test.
pub async fn test_crud_roundtrip<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_customer_store().await?;

    let created = repo.insert(&customer("Ada", Some("ada@example.com"))).await?;
    let id = created.id.expect("generated id");

    let fetched = repo.find_by_id(&id).await?.expect("row exists");
    assert_eq!(fetched.email.as_deref(), Some("ada@example.com"));

    let mut updated = fetched;
    updated.email = None;
    let updated = repo.update(&updated).await?;
    assert_eq!(repo.find_by_id(&id).await?.and_then(|c| c.email), None);

    assert!(repo.delete(&updated).await?);
    assert!(repo.find_by_id(&id).await?.is_none());
    Ok(())
}

/// Generic find_by_field test.
pub async fn test_find_by_field<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_customer_store().await?;
    repo.insert_many(&[customer("Bea", None), customer("Cy", Some("cy@example.com"))])
        .await?;

    let found = repo.find_by_field("name", ParamValue::from("Cy")).await?;
    assert_eq!(found.len(), 1);
    // Nulls never compare equal.
    assert!(repo.find_by_field("email", ParamValue::Null).await?.is_empty());
    assert!(matches!(
        repo.find_by_field("nope", ParamValue::from(1)).await,
        Err(RepoError::Query(QueryError::UnknownField { .. }))
    ));
    // Column names resolve too.
    assert_eq!(
        repo.find_by_field("email_address", ParamValue::from("cy@example.com"))
            .await?
            .len(),
        1
    );
    assert!(matches!(
        repo.find_by_field("id", ParamValue::from("seven")).await,
        Err(RepoError::Query(QueryError::Coerce { .. }))
    ));
    Ok(())
}

/// Generic dynamic query test: filter, multi-key sort, paging and delete.
pub async fn test_dynamic_queries<F: RepoFactory + Sync>(f: &F) -> RepoResult<()> {
    let repo = f.new_customer_store().await?;
    repo.insert_many(&[
        customer("Dana", Some("dana@corp.io")),
        customer("eve", Some("eve@home.net")),
        customer("Finn", Some("finn@corp.io")),
        customer("Dana", Some("dana2@home.net")),
    ])
    .await?;

    let corp = Query::<Customer>::new().filter("Email", "CORP")?;
    assert_eq!(repo.count(&corp).await?, 2);

    let sorted = Query::<Customer>::new().sort_by_keys(["name", "email"])?;
    let emails: Vec<_> = repo
        .fetch(&sorted)
        .await?
        .into_iter()
        .filter_map(|c| c.email)
        .collect();
    assert_eq!(
        emails,
        ["dana2@home.net", "dana@corp.io", "finn@corp.io", "eve@home.net"]
    );

    let second_page = repo.fetch(&sorted.clone().page(2, 3)).await?;
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].name, "eve");

    let removed = repo.delete_where(&corp).await?;
    assert_eq!(removed, 2);
    assert_eq!(repo.count(&Query::new()).await?, 2);
    Ok(())
}

#[derive(Debug)]
struct MemState<T> {
    rows: Vec<T>,
    next_id: i64,
}

/// In-memory repository over any record with an `i64` key.
/// Queries are evaluated with [`Query::apply`].
#[derive(Debug)]
pub struct MemRepo<T> {
    state: Arc<Mutex<MemState<T>>>,
}

impl<T> Clone for MemRepo<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for MemRepo<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState {
                rows: Vec::new(),
                next_id: 1,
            })),
        }
    }
}

impl<T> MemRepo<T>
where
    T: Identifiable<Key = i64> + Record + Clone,
{
    pub fn with_rows(rows: impl IntoIterator<Item = T>) -> Self {
        let repo = Self::default();
        {
            let mut g = repo.state.lock().unwrap();
            for row in rows {
                g.next_id = g.next_id.max(row.id().unwrap_or(0) + 1);
                g.rows.push(row);
            }
        }
        repo
    }

    pub fn rows(&self) -> Vec<T> {
        self.state.lock().unwrap().rows.clone()
    }
}

#[async_trait]
impl<T> Repository<T> for MemRepo<T>
where
    T: Identifiable<Key = i64> + Record + Clone + Send + Sync,
{
    async fn find_by_id(&self, id: &i64) -> RepoResult<Option<T>> {
        let g = self.state.lock().unwrap();
        Ok(g.rows.iter().find(|r| r.id() == Some(*id)).cloned())
    }

    async fn find_by_field(&self, field_name: &str, value: ParamValue) -> RepoResult<Vec<T>> {
        let registry = T::fields();
        let field = registry
            .get_ignore_case(field_name)
            .filter(|f| f.is_scalar())
            .or_else(|| registry.by_column(field_name))
            .ok_or_else(|| QueryError::UnknownField {
                entity: registry.entity(),
                field: field_name.to_owned(),
            })?;
        let wanted = value
            .coerce(field.kind(), field.nullable())
            .map_err(|source| QueryError::Coerce {
                field: field.name(),
                source,
            })?;
        let g = self.state.lock().unwrap();
        Ok(g.rows
            .iter()
            .filter(|r| field.get(r).is_some_and(|v| sql_eq(&v, &wanted)))
            .cloned()
            .collect())
    }

    async fn insert(&self, entity: &T) -> RepoResult<T> {
        let mut g = self.state.lock().unwrap();
        let mut row = entity.clone();
        let id = g.next_id;
        g.next_id += 1;
        if let Some(id_field) = T::fields().by_column(T::ID_COLUMN) {
            id_field.set(&mut row, ParamValue::I64(id))?;
        }
        g.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, entity: &T) -> RepoResult<T> {
        let mut g = self.state.lock().unwrap();
        let slot = g
            .rows
            .iter_mut()
            .find(|r| r.id().is_some() && r.id() == entity.id())
            .ok_or(RepoError::NotFound)?;
        *slot = entity.clone();
        Ok(entity.clone())
    }

    async fn delete_by_id(&self, id: &i64) -> RepoResult<bool> {
        let mut g = self.state.lock().unwrap();
        let before = g.rows.len();
        g.rows.retain(|r| r.id() != Some(*id));
        Ok(g.rows.len() != before)
    }

    async fn delete_where(&self, query: &Query<T>) -> RepoResult<u64> {
        let mut g = self.state.lock().unwrap();
        let before = g.rows.len();
        g.rows.retain(|r| !query.matches(r));
        Ok((before - g.rows.len()) as u64)
    }
}

#[async_trait]
impl<T> QuerySource<T> for MemRepo<T>
where
    T: Identifiable<Key = i64> + Record + Clone + Send + Sync,
{
    async fn fetch(&self, query: &Query<T>) -> RepoResult<Vec<T>> {
        let rows = self.rows();
        Ok(query.apply(rows))
    }

    async fn count(&self, query: &Query<T>) -> RepoResult<u64> {
        let g = self.state.lock().unwrap();
        Ok(query.count_in(g.rows.iter()))
    }
}
