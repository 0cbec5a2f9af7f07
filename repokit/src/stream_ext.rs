//! Chunked reads: a query split into consecutive windows, yielded as a stream.

use std::pin::Pin;

use futures_core::Stream;
use repokit_core::{Query, QueryError, QuerySource, Record, RepoResult};

pub type ChunkStream<'a, T> = Pin<Box<dyn Stream<Item = RepoResult<Vec<T>>> + Send + 'a>>;

pub trait SplitQueryExt<T>: QuerySource<T>
where
    T: Record + Send + Sync + 'static,
{
    /// Fetch the rows of `query` in chunks of at most `chunk_size`, one
    /// round trip per chunk. The query's own offset and limit bound the
    /// whole stream. A zero chunk size yields a single
    /// [`QueryError::InvalidChunkSize`] error.
    fn split_query(&self, query: &Query<T>, chunk_size: u64) -> ChunkStream<'_, T>;
}

impl<T, S> SplitQueryExt<T> for S
where
    T: Record + Send + Sync + 'static,
    S: QuerySource<T> + ?Sized,
{
    fn split_query(&self, query: &Query<T>, chunk_size: u64) -> ChunkStream<'_, T> {
        split_query(self, query.clone(), chunk_size)
    }
}

/// Free-standing form of [`SplitQueryExt::split_query`].
pub fn split_query<'a, T, S>(source: &'a S, query: Query<T>, chunk_size: u64) -> ChunkStream<'a, T>
where
    T: Record + Send + Sync + 'static,
    S: QuerySource<T> + ?Sized,
{
    Box::pin(async_stream::try_stream! {
        if chunk_size == 0 {
            Err::<(), _>(QueryError::InvalidChunkSize)?;
        }
        let start = query.offset();
        let end = query.limit().map(|l| start.saturating_add(l));
        let mut offset = start;
        loop {
            let take = match end {
                Some(end) if offset >= end => break,
                Some(end) => chunk_size.min(end - offset),
                None => chunk_size,
            };
            let chunk = source
                .fetch(&query.unwindowed().skip(offset).take(take))
                .await?;
            let fetched = chunk.len() as u64;
            tracing::trace!(offset, fetched, "chunk");
            if fetched > 0 {
                yield chunk;
            }
            if fetched < take {
                break;
            }
            offset += fetched;
        }
    })
}
