//! Query ergonomics available on every [`QuerySource`].

use std::collections::HashSet;
use std::hash::Hash;

use repokit_core::{
    Identifiable, ProjectionCache, ProjectionExpression, Query, QuerySource, Record, RepoError,
    RepoResult, Repository,
};

pub mod join;

pub use join::{inner_join, left_join, left_join_with};

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the query's predicates across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.total.div_ceil(self.limit)
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

#[async_trait::async_trait]
pub trait QuerySourceExt<T>: QuerySource<T>
where
    T: Record + Send + Sync + 'static,
{
    async fn get_all(&self) -> RepoResult<Vec<T>> {
        self.fetch(&Query::new()).await
    }

    async fn find(&self, query: &Query<T>) -> RepoResult<Vec<T>> {
        self.fetch(query).await
    }

    /// First match, or [`RepoError::NotFound`].
    async fn first(&self, query: &Query<T>) -> RepoResult<T> {
        self.first_or_none(query).await?.ok_or(RepoError::NotFound)
    }

    async fn first_or_none(&self, query: &Query<T>) -> RepoResult<Option<T>> {
        Ok(self.fetch(&query.clone().take(1)).await?.into_iter().next())
    }

    /// The only match. No match is [`RepoError::NotFound`], several are
    /// [`RepoError::MultipleResults`].
    async fn single(&self, query: &Query<T>) -> RepoResult<T> {
        self.single_or_none(query).await?.ok_or(RepoError::NotFound)
    }

    async fn single_or_none(&self, query: &Query<T>) -> RepoResult<Option<T>> {
        let mut rows = self.fetch(&query.clone().take(2)).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            _ => Err(RepoError::MultipleResults),
        }
    }

    async fn any(&self, query: &Query<T>) -> RepoResult<bool> {
        Ok(!self.fetch(&query.clone().take(1)).await?.is_empty())
    }

    async fn count_all(&self) -> RepoResult<u64> {
        self.count(&Query::new()).await
    }

    /// Count the matches, then fetch page `page` (1-based; 0 reads as 1) of
    /// `limit` rows. The query's own window is replaced.
    async fn pagination(&self, query: &Query<T>, page: u64, limit: u64) -> RepoResult<Page<T>> {
        let total = self.count(&query.unpaged()).await?;
        let items = self.fetch(&query.unwindowed().page(page, limit)).await?;
        tracing::debug!(total, page, limit, returned = items.len(), "pagination");
        Ok(Page {
            items,
            total,
            page: page.max(1),
            limit,
        })
    }

    async fn to_hash_set(&self, query: &Query<T>) -> RepoResult<HashSet<T>>
    where
        T: Eq + Hash,
    {
        Ok(self.fetch(query).await?.into_iter().collect())
    }

    async fn to_hash_set_page(&self, query: &Query<T>, page: u64, limit: u64) -> RepoResult<HashSet<T>>
    where
        T: Eq + Hash,
    {
        Ok(self
            .pagination(query, page, limit)
            .await?
            .items
            .into_iter()
            .collect())
    }

    /// Fetch and project each row onto `D` with a cached projection.
    async fn fetch_as<D>(&self, query: &Query<T>, cache: &ProjectionCache) -> RepoResult<Vec<D>>
    where
        D: Record + Default + Send + Sync + 'static,
    {
        let rows = self.fetch(query).await?;
        Ok(ProjectionExpression::new(&rows, cache).to::<D>()?)
    }
}

impl<T, S> QuerySourceExt<T> for S
where
    T: Record + Send + Sync + 'static,
    S: QuerySource<T> + ?Sized,
{
}

#[async_trait::async_trait]
pub trait RepositoryExt<T>: Repository<T> + QuerySource<T>
where
    T: Identifiable + Record + Clone + Send + Sync + 'static,
{
    /// Replace the single row matching `query` with `entity`, keeping the
    /// stored row's key. Returns the row as it was before the update, `None`
    /// when nothing matched, and [`RepoError::MultipleResults`] when more than
    /// one row matched.
    async fn update_matching(&self, entity: &T, query: &Query<T>) -> RepoResult<Option<T>> {
        let Some(previous) = self.single_or_none(query).await? else {
            return Ok(None);
        };
        let mut replacement = entity.clone();
        let registry = T::fields();
        if let Some(id_field) = registry.by_column(T::ID_COLUMN) {
            if let Some(key) = id_field.get(&previous) {
                id_field.set(&mut replacement, key)?;
            }
        }
        self.update(&replacement).await?;
        Ok(Some(previous))
    }
}

impl<T, R> RepositoryExt<T> for R
where
    T: Identifiable + Record + Clone + Send + Sync + 'static,
    R: Repository<T> + QuerySource<T> + ?Sized,
{
}
