#![cfg(feature = "stream-ext")]

use futures::StreamExt;
use repokit::stream_ext::{split_query, SplitQueryExt};
use repokit::{Entity, Query, QueryError, RepoError, RepoResult};
use tests_common::MemRepo;

#[derive(Entity, Clone, Debug, Default, PartialEq)]
struct Reading {
    #[fetch(id)]
    id: Option<i64>,
    sensor: String,
    value: f64,
}

fn readings(n: i64) -> MemRepo<Reading> {
    MemRepo::with_rows((1..=n).map(|i| Reading {
        id: Some(i),
        sensor: if i % 2 == 0 { "even" } else { "odd" }.to_owned(),
        value: i as f64,
    }))
}

fn ids(chunk: &[Reading]) -> Vec<i64> {
    chunk.iter().filter_map(|r| r.id).collect()
}

#[tokio::test]
async fn chunks_cover_every_row_once() -> RepoResult<()> {
    let repo = readings(7);
    let q = Query::<Reading>::new().sort_by("id")?;
    let chunks: Vec<Vec<Reading>> = repo
        .split_query(&q, 3)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<RepoResult<_>>()?;
    let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
    assert_eq!(sizes, [3, 3, 1]);
    assert_eq!(ids(&chunks[2]), [7]);
    Ok(())
}

#[tokio::test]
async fn exact_multiple_ends_without_an_empty_chunk() -> RepoResult<()> {
    let repo = readings(4);
    let mut stream = split_query(&repo, Query::new().sort_by("id")?, 2);
    let mut seen = Vec::new();
    while let Some(chunk) = stream.next().await {
        seen.push(ids(&chunk?));
    }
    assert_eq!(seen, [vec![1, 2], vec![3, 4]]);
    Ok(())
}

#[tokio::test]
async fn window_and_filter_bound_the_stream() -> RepoResult<()> {
    let repo = readings(10);
    let q = Query::<Reading>::new()
        .filter("sensor", "odd")?
        .sort_by("id")?
        .skip(1)
        .take(3);
    let mut stream = repo.split_query(&q, 2);
    let mut seen = Vec::new();
    while let Some(chunk) = stream.next().await {
        seen.extend(ids(&chunk?));
    }
    assert_eq!(seen, [3, 5, 7]);
    Ok(())
}

#[tokio::test]
async fn zero_chunk_size_is_an_error() {
    let repo = readings(2);
    let mut stream = repo.split_query(&Query::new(), 0);
    let first = stream.next().await.expect("one item");
    assert!(matches!(
        first,
        Err(RepoError::Query(QueryError::InvalidChunkSize))
    ));
    assert!(stream.next().await.is_none());
}
