use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use repokit_core::transactions::{
    Isolation, Propagation, TransactionDefinition, TransactionManager, UnitOfWork, UnitOfWorkState,
};
use repokit_core::{
    ContextOptions, DataConfig, DbContext, ParamValue, Query, QuerySource, RepoError, RepoResult,
    Repository,
};
use repokit_libsql::{LibsqlContext, LibsqlRepository, RecordRowAdapter};
use tests_common::{customer, migrations, order, Customer, Order, RepoFactory, Store};

struct FileDbs {
    dir: tempfile::TempDir,
    next: AtomicUsize,
}

impl FileDbs {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            next: AtomicUsize::new(0),
        }
    }

    async fn context(&self) -> RepoResult<LibsqlContext> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.path().join(format!("db_{n}.sqlite3"));
        let ctx =
            LibsqlContext::open(ContextOptions::new(format!("file:{}?mode=rwc", path.display())))
                .await?;
        ctx.execute_batch(migrations::LIBSQL_SCHEMA_SQL).await?;
        Ok(ctx)
    }
}

#[async_trait]
impl RepoFactory for FileDbs {
    async fn new_customer_store(&self) -> RepoResult<Box<dyn Store<Customer>>> {
        let ctx = self.context().await?;
        Ok(Box::new(ctx.records::<Customer>()))
    }
}

#[tokio::test]
async fn generic_suite_runs_against_libsql() -> RepoResult<()> {
    let f = FileDbs::new();
    tests_common::test_crud_roundtrip(&f).await?;
    tests_common::test_find_by_field(&f).await?;
    tests_common::test_dynamic_queries(&f).await?;
    Ok(())
}

#[tokio::test]
async fn dates_floats_and_bools_survive_a_round_trip() -> RepoResult<()> {
    let dbs = FileDbs::new();
    let ctx = dbs.context().await?;
    let customers = ctx.records::<Customer>();
    let ada = customers.insert(&customer("Ada", None)).await?;
    let orders = ctx.records::<Order>();
    let placed = orders
        .insert(&order(ada.id.unwrap(), "Widget", 3, 2.5, true))
        .await?;
    let loaded = orders.find_by_id(&placed.id.unwrap()).await?.unwrap();
    assert_eq!(loaded.placed_on, placed.placed_on);
    assert_eq!(loaded.price, 2.5);
    assert!(loaded.shipped);
    // Nested records are not stored.
    assert_eq!(loaded.customer, Customer::default());

    let shipped = orders
        .fetch(&Query::<Order>::new().filter("shipped", "true")?)
        .await?;
    assert_eq!(shipped.len(), 1);
    let unshipped = orders
        .fetch(&Query::<Order>::new().filter("shipped", "True")?)
        .await?;
    assert!(unshipped.is_empty(), "only the exact text `true` means true");
    Ok(())
}

#[tokio::test]
async fn unit_of_work_commits_and_rolls_back() -> RepoResult<()> {
    let dbs = FileDbs::new();
    let ctx = dbs.context().await?;

    let uow = ctx.unit_of_work().await?;
    assert_eq!(uow.state(), UnitOfWorkState::Active);
    let repo = uow.repository::<Customer, _>(RecordRowAdapter::new());
    repo.insert(&customer("Kept", None)).await?;
    repo.insert_all(&[customer("A", None), customer("B", None)]).await?;
    assert_eq!(uow.save_changes().await?, 3);
    assert_eq!(uow.save_changes().await?, 0);
    uow.commit().await?;
    assert_eq!(uow.state(), UnitOfWorkState::Committed);
    assert!(matches!(uow.commit().await, Err(RepoError::Transaction(_))));

    let uow = ctx.unit_of_work().await?;
    let repo = uow.repository::<Customer, _>(RecordRowAdapter::new());
    repo.insert(&customer("Dropped", None)).await?;
    assert!(matches!(
        uow.begin_transaction(Isolation::Default).await,
        Err(RepoError::Transaction(_))
    ));
    uow.rollback().await?;
    assert_eq!(uow.state(), UnitOfWorkState::RolledBack);

    let names: Vec<_> = ctx
        .records::<Customer>()
        .fetch(&Query::new().sort_by("name")?)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["A", "B", "Kept"]);
    Ok(())
}

#[tokio::test]
async fn unit_of_work_execute_wraps_a_closure() -> RepoResult<()> {
    let dbs = FileDbs::new();
    let ctx = dbs.context().await?;
    let uow = ctx.unit_of_work().await?;

    let err = uow
        .execute(|u| async move {
            u.repository::<Customer, _>(RecordRowAdapter::new())
                .insert(&customer("Ghost", None))
                .await?;
            Err::<(), _>(RepoError::NotFound)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    assert_eq!(uow.state(), UnitOfWorkState::RolledBack);

    // A finished unit can begin again.
    let id = uow
        .execute(|u| async move {
            let c = u
                .repository::<Customer, _>(RecordRowAdapter::new())
                .insert(&customer("Real", None))
                .await?;
            Ok(c.id)
        })
        .await?;
    assert_eq!(uow.state(), UnitOfWorkState::Committed);

    let all = ctx.records::<Customer>().fetch(&Query::new()).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, id);
    Ok(())
}

#[tokio::test]
async fn manager_joins_prebuilt_repositories_and_rolls_back_savepoints() -> RepoResult<()> {
    let dbs = FileDbs::new();
    let ctx = dbs.context().await?;
    let mgr = ctx.transaction_manager();
    let repo: LibsqlRepository<Customer, RecordRowAdapter<Customer>> = ctx.records();

    let outer = TransactionDefinition::default();
    let inner = TransactionDefinition {
        propagation: Propagation::RequiresNew,
        ..TransactionDefinition::default()
    };
    mgr.execute(&outer, |_ctx| async {
        repo.insert(&customer("outer", None)).await?;
        let failed = mgr
            .execute(&inner, |_ctx| async {
                repo.insert(&customer("inner", None)).await?;
                Err::<(), _>(RepoError::Transaction("inner fails"))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(repo.count(&Query::new()).await?, 1);
        Ok(())
    })
    .await?;

    let fresh = ctx.records::<Customer>();
    assert_eq!(fresh.find_by_field("name", "outer".into()).await?.len(), 1);
    assert!(fresh.find_by_field("name", "inner".into()).await?.is_empty());

    let never = TransactionDefinition {
        propagation: Propagation::Never,
        ..TransactionDefinition::default()
    };
    let err = mgr
        .execute(&outer, |_ctx| async {
            mgr.execute(&never, |_ctx| async { Ok(()) }).await
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Transaction(_)));
    Ok(())
}

#[tokio::test]
async fn named_in_memory_databases_are_shared_while_open() -> RepoResult<()> {
    let config = DataConfig::default();
    let adaptor = LibsqlContext::register_in_memory(&config, "unused", Some("shared_mem_test")).await?;
    let ctx = adaptor.context().expect("context");
    assert!(ctx.options().is_in_memory());
    ctx.execute_batch(migrations::LIBSQL_SCHEMA_SQL).await?;
    ctx.records::<Customer>()
        .insert(&customer("Mem", Some("mem@example.com")))
        .await?;

    let again = ctx
        .records::<Customer>()
        .find_by_field("email", ParamValue::from("mem@example.com"))
        .await?;
    assert_eq!(again.len(), 1);
    Ok(())
}

#[tokio::test]
async fn register_requires_a_known_connection_string() {
    let err = LibsqlContext::register(&DataConfig::default(), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Config(_)));
}
