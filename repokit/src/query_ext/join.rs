//! Client-side joins between query results.
//!
//! Both sides are fetched in full and matched in memory, keyed by the values
//! the two key selectors return. Results keep the order of the left side; a
//! left row matching several right rows yields one result per match, in right
//! order.

use std::collections::HashMap;
use std::hash::Hash;

use repokit_core::{Query, QuerySource, Record, RepoResult};

fn index_by<R, K>(rows: &[R], key: impl Fn(&R) -> K) -> HashMap<K, Vec<usize>>
where
    K: Eq + Hash,
{
    let mut index: HashMap<K, Vec<usize>> = HashMap::new();
    for (pos, row) in rows.iter().enumerate() {
        index.entry(key(row)).or_default().push(pos);
    }
    index
}

fn join_rows<L, R, K, O>(
    left: &[L],
    right: &[R],
    left_key: impl Fn(&L) -> K,
    right_key: impl Fn(&R) -> K,
    keep_unmatched: bool,
    mut select: impl FnMut(&L, Option<&R>) -> O,
) -> Vec<O>
where
    K: Eq + Hash,
{
    let index = index_by(right, right_key);
    let mut out = Vec::with_capacity(left.len());
    for l in left {
        match index.get(&left_key(l)) {
            Some(positions) => {
                for &pos in positions {
                    out.push(select(l, Some(&right[pos])));
                }
            }
            None if keep_unmatched => out.push(select(l, None)),
            None => {}
        }
    }
    out
}

/// Inner join of two query results on equal keys.
///
/// ```ignore
/// let lines = inner_join(
///     &orders, &Query::new().sort_by("id")?,
///     &customers, &Query::new(),
///     |o: &Order| o.customer_id,
///     |c: &Customer| c.id.unwrap_or_default(),
///     |o, c| (o.product.clone(), c.name.clone()),
/// ).await?;
/// ```
#[allow(clippy::too_many_arguments)]
pub async fn inner_join<L, R, K, O, SL, SR>(
    left_source: &SL,
    left_query: &Query<L>,
    right_source: &SR,
    right_query: &Query<R>,
    left_key: impl Fn(&L) -> K,
    right_key: impl Fn(&R) -> K,
    mut select: impl FnMut(&L, &R) -> O,
) -> RepoResult<Vec<O>>
where
    L: Record + Send + Sync,
    R: Record + Send + Sync,
    K: Eq + Hash,
    SL: QuerySource<L> + ?Sized,
    SR: QuerySource<R> + ?Sized,
{
    let left = left_source.fetch(left_query).await?;
    let right = right_source.fetch(right_query).await?;
    let out = join_rows(&left, &right, left_key, right_key, false, |l, r| {
        r.map(|r| select(l, r))
    });
    tracing::debug!(left = left.len(), right = right.len(), "inner join");
    Ok(out.into_iter().flatten().collect())
}

/// Left outer join: every left row appears at least once, with `None` when no
/// right row shares its key.
#[allow(clippy::too_many_arguments)]
pub async fn left_join<L, R, K, O, SL, SR>(
    left_source: &SL,
    left_query: &Query<L>,
    right_source: &SR,
    right_query: &Query<R>,
    left_key: impl Fn(&L) -> K,
    right_key: impl Fn(&R) -> K,
    select: impl FnMut(&L, Option<&R>) -> O,
) -> RepoResult<Vec<O>>
where
    L: Record + Send + Sync,
    R: Record + Send + Sync,
    K: Eq + Hash,
    SL: QuerySource<L> + ?Sized,
    SR: QuerySource<R> + ?Sized,
{
    let right = right_source.fetch(right_query).await?;
    left_join_with(left_source, left_query, &right, left_key, right_key, select).await
}

/// Left outer join against rows already in memory.
pub async fn left_join_with<L, R, K, O, SL>(
    left_source: &SL,
    left_query: &Query<L>,
    right: &[R],
    left_key: impl Fn(&L) -> K,
    right_key: impl Fn(&R) -> K,
    select: impl FnMut(&L, Option<&R>) -> O,
) -> RepoResult<Vec<O>>
where
    L: Record + Send + Sync,
    K: Eq + Hash,
    SL: QuerySource<L> + ?Sized,
{
    let left = left_source.fetch(left_query).await?;
    tracing::debug!(left = left.len(), right = right.len(), "left join");
    Ok(join_rows(&left, right, left_key, right_key, true, select))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_rows_keeps_left_order_and_fans_out() {
        let left = [3, 1, 2];
        let right = [(1, "a"), (3, "b"), (1, "c")];
        let inner = join_rows(&left, &right, |l| *l, |r| r.0, false, |l, r| (*l, r.map(|r| r.1)));
        assert_eq!(inner, [(3, Some("b")), (1, Some("a")), (1, Some("c"))]);

        let outer = join_rows(&left, &right, |l| *l, |r| r.0, true, |l, r| (*l, r.map(|r| r.1)));
        assert_eq!(outer.last(), Some(&(2, None)));
        assert_eq!(outer.len(), 4);
    }
}
