use repokit::query_ext::{inner_join, left_join, left_join_with, QuerySourceExt, RepositoryExt};
use repokit::{
    Entity, ProjectionCache, ProjectionExpression, Query, RepoError, RepoResult, Repository,
};
use tests_common::{customer, order, Customer, MemRepo, Order, OrderSummary};

#[derive(Entity, Clone, Debug, Default, PartialEq, Eq, Hash)]
struct Tag {
    #[fetch(id)]
    id: Option<i64>,
    label: String,
}

fn tag(id: i64, label: &str) -> Tag {
    Tag {
        id: Some(id),
        label: label.to_owned(),
    }
}

fn tags() -> MemRepo<Tag> {
    MemRepo::with_rows([
        tag(1, "red"),
        tag(2, "green"),
        tag(3, "blue"),
        tag(4, "cyan"),
        tag(5, "reddish"),
    ])
}

async fn seeded() -> RepoResult<(MemRepo<Customer>, MemRepo<Order>)> {
    let customers = MemRepo::<Customer>::default();
    let ada = customers.insert(&customer("Ada", Some("ada@example.com"))).await?;
    let bo = customers.insert(&customer("Bo", None)).await?;
    let orders = MemRepo::<Order>::default();
    let ada_id = ada.id.unwrap_or_default();
    let bo_id = bo.id.unwrap_or_default();
    orders.insert(&order(ada_id, "Lamp", 1, 20.0, true)).await?;
    orders.insert(&order(bo_id, "Desk", 2, 150.0, false)).await?;
    orders.insert(&order(ada_id, "Chair", 4, 45.5, false)).await?;
    orders.insert(&order(99, "Orphan", 1, 1.0, false)).await?;
    Ok((customers, orders))
}

#[tokio::test]
async fn pagination_counts_all_matches_and_keeps_ordering() -> RepoResult<()> {
    let repo = tags();
    let q = Query::<Tag>::new().sort_by_descending("label")?.take(1);

    let page = repo.pagination(&q, 2, 2).await?;
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages(), 3);
    assert!(page.has_next());
    let labels: Vec<_> = page.items.iter().map(|t| t.label.as_str()).collect();
    assert_eq!(labels, ["green", "cyan"]);

    let last = repo.pagination(&q, 3, 2).await?;
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_next());

    let filtered = repo
        .pagination(&Query::new().filter("label", "red")?, 0, 10)
        .await?;
    assert_eq!((filtered.page, filtered.total), (1, 2));
    Ok(())
}

#[tokio::test]
async fn first_and_single_distinguish_empty_and_ambiguous() -> RepoResult<()> {
    let repo = tags();
    let reds = Query::<Tag>::new().filter("label", "red")?.sort_by("id")?;

    assert_eq!(repo.first(&reds).await?.label, "red");
    assert!(matches!(repo.single(&reds).await, Err(RepoError::MultipleResults)));
    assert!(matches!(
        repo.single_or_none(&reds).await,
        Err(RepoError::MultipleResults)
    ));

    let cyan = Query::<Tag>::new().where_eq("label", "cyan").0;
    assert_eq!(repo.single(&cyan).await?.id, Some(4));

    let none = Query::<Tag>::new().filter("label", "violet")?;
    assert!(matches!(repo.first(&none).await, Err(RepoError::NotFound)));
    assert!(repo.first_or_none(&none).await?.is_none());
    assert!(repo.single_or_none(&none).await?.is_none());
    assert!(!repo.any(&none).await?);
    assert!(repo.any(&reds).await?);
    assert_eq!(repo.count_all().await?, 5);
    assert_eq!(repo.get_all().await?.len(), 5);
    assert_eq!(repo.find(&reds).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn hash_sets_hold_distinct_rows() -> RepoResult<()> {
    let repo = MemRepo::with_rows([tag(1, "a"), tag(2, "b"), tag(3, "c")]);
    let all = repo.to_hash_set(&Query::new()).await?;
    assert_eq!(all.len(), 3);
    assert!(all.contains(&tag(2, "b")));

    let page = repo
        .to_hash_set_page(&Query::new().sort_by("label")?, 2, 2)
        .await?;
    assert_eq!(page.into_iter().collect::<Vec<_>>(), [tag(3, "c")]);
    Ok(())
}

#[tokio::test]
async fn update_matching_keeps_the_stored_key() -> RepoResult<()> {
    let repo = tags();
    let replacement = Tag {
        id: None,
        label: "teal".into(),
    };

    let previous = repo
        .update_matching(&replacement, &Query::new().filter("label", "cyan")?)
        .await?;
    assert_eq!(previous, Some(tag(4, "cyan")));
    assert_eq!(repo.find_by_id(&4).await?, Some(tag(4, "teal")));

    let missing = repo
        .update_matching(&replacement, &Query::new().filter("label", "violet")?)
        .await?;
    assert!(missing.is_none());

    let ambiguous = repo
        .update_matching(&replacement, &Query::new().filter("label", "red")?)
        .await;
    assert!(matches!(ambiguous, Err(RepoError::MultipleResults)));
    assert_eq!(repo.rows().iter().filter(|t| t.label == "teal").count(), 1);
    Ok(())
}

#[tokio::test]
async fn joins_follow_left_order() -> RepoResult<()> {
    let (customers, orders) = seeded().await?;
    let by_id = Query::<Order>::new().sort_by("id")?;

    let inner = inner_join(
        &orders,
        &by_id,
        &customers,
        &Query::new(),
        |o: &Order| o.customer_id,
        |c: &Customer| c.id.unwrap_or_default(),
        |o, c| (o.product.clone(), c.name.clone()),
    )
    .await?;
    assert_eq!(
        inner,
        [
            ("Lamp".to_owned(), "Ada".to_owned()),
            ("Desk".to_owned(), "Bo".to_owned()),
            ("Chair".to_owned(), "Ada".to_owned()),
        ]
    );

    let outer = left_join(
        &orders,
        &by_id,
        &customers,
        &Query::new(),
        |o: &Order| o.customer_id,
        |c: &Customer| c.id.unwrap_or_default(),
        |o, c| (o.product.clone(), c.map(|c| c.name.clone())),
    )
    .await?;
    assert_eq!(outer.len(), 4);
    assert_eq!(outer[3], ("Orphan".to_owned(), None));

    let only_ada = customers
        .find(&Query::new().filter("name", "ada")?)
        .await?;
    let shipped = left_join_with(
        &orders,
        &by_id,
        &only_ada,
        |o: &Order| o.customer_id,
        |c: &Customer| c.id.unwrap_or_default(),
        |o, c| c.is_some() && o.shipped,
    )
    .await?;
    assert_eq!(shipped, [true, false, false, false]);
    Ok(())
}

#[tokio::test]
async fn joined_rows_project_onto_flat_summaries() -> RepoResult<()> {
    let (customers, orders) = seeded().await?;
    let joined = inner_join(
        &orders,
        &Query::new().sort_by("id")?,
        &customers,
        &Query::new(),
        |o: &Order| o.customer_id,
        |c: &Customer| c.id.unwrap_or_default(),
        |o, c| Order {
            customer: c.clone(),
            ..o.clone()
        },
    )
    .await?;

    let cache = ProjectionCache::new();
    let summaries = ProjectionExpression::new(&joined, &cache).to::<OrderSummary>()?;
    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries[0].product, "Lamp");
    assert_eq!(summaries[0].customer_name, "Ada");
    assert_eq!(summaries[0].customer_email.as_deref(), Some("ada@example.com"));
    assert_eq!(summaries[1].customer_email, None);

    let stored = MemRepo::with_rows(joined);
    let shipped = stored
        .fetch_as::<OrderSummary>(&Query::new().filter("shipped", true)?, &cache)
        .await?;
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].quantity, 1);
    assert_eq!(cache.builds(), 1);
    Ok(())
}
