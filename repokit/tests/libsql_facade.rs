#![cfg(feature = "libsql-backend")]

use repokit::backends::LibsqlContext;
use repokit::query_ext::QuerySourceExt;
use repokit::stream_ext::SplitQueryExt;
use repokit::{ContextOptions, DbContext, Query, RepoResult, Repository};
use futures::TryStreamExt;
use tests_common::{customer, migrations, Customer};

async fn context(dir: &tempfile::TempDir) -> RepoResult<LibsqlContext> {
    let path = dir.path().join("facade.sqlite3");
    let ctx = LibsqlContext::open(ContextOptions::new(format!("file:{}?mode=rwc", path.display())))
        .await?;
    ctx.execute_batch(migrations::LIBSQL_SCHEMA_SQL).await?;
    Ok(ctx)
}

#[tokio::test]
async fn extensions_run_against_libsql() -> RepoResult<()> {
    let dir = tempfile::tempdir().expect("temp dir");
    let ctx = context(&dir).await?;
    let repo = ctx.records::<Customer>();
    for name in ["Ann", "Ben", "Cal", "Dee", "Eli"] {
        repo.insert(&customer(name, None)).await?;
    }

    let q = Query::<Customer>::new().sort_by_descending("name")?;
    let page = repo.pagination(&q, 2, 2).await?;
    assert_eq!(page.total, 5);
    let names: Vec<_> = page.items.into_iter().map(|c| c.name).collect();
    assert_eq!(names, ["Cal", "Ben"]);

    let chunks: Vec<Vec<Customer>> = repo.split_query(&q, 2).try_collect().await?;
    assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), [2, 2, 1]);

    let uow = ctx.unit_of_work().await?;
    uow.execute(|u| async move {
        u.repository::<Customer, _>(repokit::backends::RecordRowAdapter::new())
            .insert(&customer("Fay", None))
            .await
    })
    .await?;
    assert_eq!(repo.count_all().await?, 6);
    Ok(())
}

#[tokio::test]
async fn null_equality_and_unbounded_windows_reach_sqlite() -> RepoResult<()> {
    let dir = tempfile::tempdir().expect("temp dir");
    let ctx = context(&dir).await?;
    let repo = ctx.records::<Customer>();
    repo.insert(&customer("Ann", None)).await?;
    repo.insert(&customer("Bo", Some("bo@example.com"))).await?;

    let (q, ok) = Query::<Customer>::new().where_eq("email", None::<String>);
    assert!(ok);
    let names: Vec<_> = repo.find(&q).await?.into_iter().map(|c| c.name).collect();
    assert_eq!(names, ["Ann"]);

    let everything = Query::<Customer>::new().sort_by("name")?.skip(1).take(u64::MAX);
    let rest: Vec<_> = repo.find(&everything).await?.into_iter().map(|c| c.name).collect();
    assert_eq!(rest, ["Bo"]);
    Ok(())
}
