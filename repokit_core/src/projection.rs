//! Name-based mapping from one record type to another.
//!
//! A [`Projection<S, D>`] is built once per type pair and then applied to any
//! number of `S` values. Destination fields bind to the source field with the
//! same name, or to a field one level down when the destination name splits
//! into exactly two words: `customer_name` (or `CustomerName`) reads
//! `customer.name`.
//!
//! Construction outcomes for a writable destination field:
//!
//! | destination name            | outcome                              |
//! |-----------------------------|--------------------------------------|
//! | same name as a source field | direct binding                       |
//! | two words, parent is nested | nested binding                       |
//! | two words, parent is scalar | [`ProjectionError::MissingNestedField`] |
//! | two words, child missing    | [`ProjectionError::MissingNestedField`] |
//! | anything else               | left at its default                  |

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::record::{Getter, Record, Setter};
use crate::value::{CoerceError, FieldKind, ParamValue};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("`{parent}` of {source_entity} has no field `{field}` (needed by `{target}`)")]
    MissingNestedField {
        source_entity: &'static str,
        parent: &'static str,
        field: String,
        target: &'static str,
    },
    #[error("cannot bind `{target}` ({target_kind:?}) from `{path}` ({source_kind:?})")]
    KindMismatch {
        target: &'static str,
        path: String,
        source_kind: FieldKind,
        target_kind: FieldKind,
    },
    #[error("failed to assign `{target}`")]
    Assign {
        target: &'static str,
        #[source]
        source: CoerceError,
    },
    #[error("projection cache entry has an unexpected type")]
    CacheEntryType,
}

enum Path<S> {
    Direct {
        field: &'static str,
        get: Getter<S>,
    },
    Nested {
        parent: &'static str,
        child: &'static str,
        read: fn(&S, &str) -> Option<ParamValue>,
    },
}

impl<S> Path<S> {
    fn describe(&self) -> String {
        match self {
            Path::Direct { field, .. } => (*field).to_owned(),
            Path::Nested { parent, child, .. } => format!("{parent}.{child}"),
        }
    }

    fn read(&self, item: &S) -> ParamValue {
        match self {
            Path::Direct { get, .. } => get(item),
            Path::Nested { child, read, .. } => read(item, child).unwrap_or(ParamValue::Null),
        }
    }
}

struct Binding<S, D> {
    target: &'static str,
    path: Path<S>,
    set: Setter<D>,
}

/// Compiled field-by-field mapping from `S` to `D`.
pub struct Projection<S, D> {
    bindings: Vec<Binding<S, D>>,
    skipped: Vec<&'static str>,
    _types: PhantomData<fn(&S) -> D>,
}

impl<S, D> fmt::Debug for Projection<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("bindings", &self.bindings().collect::<Vec<_>>())
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Split a field name into lowercase words on `_` and before each uppercase letter.
pub(crate) fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch == '_' || ch.is_uppercase() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            if ch == '_' {
                continue;
            }
        }
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn check_kind(
    target: &'static str,
    target_kind: FieldKind,
    target_nullable: bool,
    path: String,
    source_kind: FieldKind,
    source_nullable: bool,
) -> Result<(), ProjectionError> {
    if source_kind == target_kind && (target_nullable || !source_nullable) {
        Ok(())
    } else {
        Err(ProjectionError::KindMismatch {
            target,
            path,
            source_kind,
            target_kind,
        })
    }
}

impl<S: Record, D: Record> Projection<S, D> {
    pub fn build() -> Result<Self, ProjectionError> {
        let source = S::fields();
        let mut bindings = Vec::new();
        let mut skipped = Vec::new();

        for dest in D::fields().iter() {
            let Some(set) = dest.setter() else {
                continue;
            };
            if let Some((src, get)) = source
                .get(dest.name())
                .and_then(|f| f.getter().map(|g| (f, g)))
            {
                check_kind(
                    dest.name(),
                    dest.kind(),
                    dest.nullable(),
                    src.name().to_owned(),
                    src.kind(),
                    src.nullable(),
                )?;
                bindings.push(Binding {
                    target: dest.name(),
                    path: Path::Direct {
                        field: src.name(),
                        get,
                    },
                    set,
                });
                continue;
            }

            let words = split_words(dest.name());
            let [parent_word, child_word] = words.as_slice() else {
                skipped.push(dest.name());
                continue;
            };
            let Some(parent) = source.get_ignore_case(parent_word) else {
                skipped.push(dest.name());
                continue;
            };
            let missing = || ProjectionError::MissingNestedField {
                source_entity: source.entity(),
                parent: parent.name(),
                field: child_word.clone(),
                target: dest.name(),
            };
            let nested = parent.nested_access().ok_or_else(missing)?;
            let child = nested.resolve(child_word).ok_or_else(missing)?;
            check_kind(
                dest.name(),
                dest.kind(),
                dest.nullable(),
                format!("{}.{}", parent.name(), child.name),
                child.kind,
                child.nullable,
            )?;
            bindings.push(Binding {
                target: dest.name(),
                path: Path::Nested {
                    parent: parent.name(),
                    child: child.name,
                    read: nested.reader(),
                },
                set,
            });
        }

        tracing::debug!(
            source = source.entity(),
            destination = D::fields().entity(),
            bound = bindings.len(),
            skipped = skipped.len(),
            "built projection"
        );
        Ok(Self {
            bindings,
            skipped,
            _types: PhantomData,
        })
    }
}

impl<S, D> Projection<S, D> {
    /// `(destination field, source path)` for every bound field.
    pub fn bindings(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        self.bindings.iter().map(|b| (b.target, b.path.describe()))
    }

    /// Writable destination fields that found no source.
    pub fn skipped(&self) -> &[&'static str] {
        &self.skipped
    }
}

impl<S, D: Default> Projection<S, D> {
    /// Map one value. Unbound destination fields keep their default.
    pub fn apply(&self, item: &S) -> Result<D, ProjectionError> {
        let mut out = D::default();
        for b in &self.bindings {
            (b.set)(&mut out, b.path.read(item)).map_err(|source| ProjectionError::Assign {
                target: b.target,
                source,
            })?;
        }
        Ok(out)
    }

    pub fn apply_all<'a, I>(&self, items: I) -> Result<Vec<D>, ProjectionError>
    where
        I: IntoIterator<Item = &'a S>,
        S: 'a,
    {
        items.into_iter().map(|i| self.apply(i)).collect()
    }
}

/// Process-lifetime store of built projections keyed by type pair.
///
/// Entries are never evicted. Concurrent first requests for the same pair
/// build it once; the others wait on the map entry and share the result.
#[derive(Default)]
pub struct ProjectionCache {
    entries: DashMap<(TypeId, TypeId), Arc<dyn Any + Send + Sync>>,
    builds: AtomicUsize,
}

impl fmt::Debug for ProjectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionCache")
            .field("entries", &self.entries.len())
            .field("builds", &self.builds())
            .finish()
    }
}

fn downcast<S: 'static, D: 'static>(
    entry: Arc<dyn Any + Send + Sync>,
) -> Result<Arc<Projection<S, D>>, ProjectionError> {
    entry
        .downcast::<Projection<S, D>>()
        .map_err(|_| ProjectionError::CacheEntryType)
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance for callers that do not manage their own cache.
    pub fn global() -> &'static ProjectionCache {
        static GLOBAL: OnceLock<ProjectionCache> = OnceLock::new();
        GLOBAL.get_or_init(ProjectionCache::new)
    }

    pub fn get_or_build<S, D>(&self) -> Result<Arc<Projection<S, D>>, ProjectionError>
    where
        S: Record,
        D: Record + Default,
    {
        let key = (TypeId::of::<S>(), TypeId::of::<D>());
        if let Some(found) = self.entries.get(&key) {
            return downcast(Arc::clone(found.value()));
        }
        match self.entries.entry(key) {
            Entry::Occupied(e) => downcast(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let built = Arc::new(Projection::<S, D>::build()?);
                self.builds.fetch_add(1, Ordering::Relaxed);
                e.insert(built.clone());
                Ok(built)
            }
        }
    }

    /// Number of projections built so far. Cache hits do not count.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A sequence of `S` waiting for its destination type.
pub struct ProjectionExpression<'a, S> {
    items: &'a [S],
    cache: &'a ProjectionCache,
}

impl<'a, S: Record> ProjectionExpression<'a, S> {
    pub fn new(items: &'a [S], cache: &'a ProjectionCache) -> Self {
        Self { items, cache }
    }

    pub fn to<D: Record + Default>(&self) -> Result<Vec<D>, ProjectionError> {
        let projection = self.cache.get_or_build::<S, D>()?;
        projection.apply_all(self.items)
    }
}

/// Start a projection over `items` using `cache`.
pub fn project<'a, S: Record>(
    items: &'a [S],
    cache: &'a ProjectionCache,
) -> ProjectionExpression<'a, S> {
    ProjectionExpression::new(items, cache)
}
