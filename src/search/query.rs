//! Fluent query builder.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::index::IndexBackend;
use crate::model::{Entity, EntityKind, Value, UUID_KEY};
use crate::security::SecurityContext;
use crate::storage::StorageBackend;
use crate::{Error, Result};
use super::{Comparison, Occur, Predicate, PredicateGroup, QueryExecutor};

/// One page of results plus the size of the whole result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub entities: Vec<Entity>,
    /// Matches before paging.
    pub total: usize,
}

#[derive(Debug, Clone)]
struct SortOrder {
    key: String,
    descending: bool,
}

/// Accumulates a predicate tree, then runs it through a [`QueryExecutor`].
///
/// Every builder method adds one child to the root group; nested logic goes
/// through [`group`](Self::group).
pub struct Query<B: StorageBackend, I: IndexBackend> {
    executor: QueryExecutor<B, I>,
    ctx: Arc<SecurityContext>,
    kind: EntityKind,
    root: PredicateGroup,
    sort: Option<SortOrder>,
    page: Option<(usize, usize)>,
}

impl<B: StorageBackend, I: IndexBackend> Query<B, I> {
    pub fn new(executor: QueryExecutor<B, I>, ctx: Arc<SecurityContext>, kind: EntityKind) -> Self {
        Self {
            executor,
            ctx,
            kind,
            root: PredicateGroup::default(),
            sort: None,
            page: None,
        }
    }

    /// Restrict to one entity type.
    pub fn and_type(mut self, type_name: impl Into<String>) -> Self {
        self.root.add(Predicate::of_type(Occur::Must, type_name));
        self
    }

    /// Identity lookup.
    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.root.add(Predicate::equals(Occur::Must, UUID_KEY, uuid.into()));
        self
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.root.add(Predicate::equals(Occur::Must, key, value));
        self
    }

    /// Optional equality; at least one `or` clause must hold.
    pub fn or(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.root.add(Predicate::equals(Occur::Should, key, value));
        self
    }

    pub fn not(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.root.add(Predicate::equals(Occur::MustNot, key, value));
        self
    }

    pub fn and_contains(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.root.add(Predicate::new(Occur::Must, key, Comparison::Contains(text.into())));
        self
    }

    /// `lower <= value < upper`; `None` leaves that side open.
    pub fn and_range(mut self, key: impl Into<String>, lower: Option<Value>, upper: Option<Value>) -> Self {
        self.root.add(Predicate::new(Occur::Must, key, Comparison::Between { lower, upper }));
        self
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.root.add(Predicate::new(Occur::Must, key, Comparison::Exists));
        self
    }

    /// Add a nested group, combined by its own occurrence.
    pub fn group(mut self, group: PredicateGroup) -> Self {
        self.root.add(group);
        self
    }

    /// Order by a property value; entities without it come last.
    pub fn sort_by(mut self, key: impl Into<String>, descending: bool) -> Self {
        self.sort = Some(SortOrder { key: key.into(), descending });
        self
    }

    /// One-based page of `size` entities, applied after sorting.
    pub fn page(mut self, page: usize, size: usize) -> Self {
        self.page = Some((page, size));
        self
    }

    /// The tree built so far.
    pub fn predicates(&self) -> &PredicateGroup {
        &self.root
    }

    pub fn get_result(&self) -> Result<SearchResult> {
        let mut entities = self.executor.execute(&self.root, self.kind, &self.ctx)?;

        if let Some(order) = &self.sort {
            entities.sort_by(|a, b| compare_by(a, b, order));
        }

        let total = entities.len();
        if let Some((page, size)) = self.page {
            if size == 0 {
                return Err(Error::Query("page size must be at least 1".into()));
            }
            let skip = page.saturating_sub(1).saturating_mul(size);
            entities = entities.into_iter().skip(skip).take(size).collect();
        }

        Ok(SearchResult { entities, total })
    }

    pub fn get_as_list(&self) -> Result<Vec<Entity>> {
        Ok(self.get_result()?.entities)
    }

    pub fn get_first(&self) -> Result<Option<Entity>> {
        Ok(self.get_as_list()?.into_iter().next())
    }
}

fn compare_by(a: &Entity, b: &Entity, order: &SortOrder) -> Ordering {
    let left = a.get(&order.key).filter(|v| !v.is_null());
    let right = b.get(&order.key).filter(|v| !v.is_null());
    match (left, right) {
        (Some(l), Some(r)) => {
            let ord = l.compare(r).unwrap_or(Ordering::Equal);
            if order.descending { ord.reverse() } else { ord }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
