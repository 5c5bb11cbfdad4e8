//! Query executor: index candidates plus exact re-filtering.

use std::sync::Arc;

use tracing::debug;

use crate::index::IndexBackend;
use crate::model::{Entity, EntityKind};
use crate::schema::is_system_key;
use crate::security::SecurityContext;
use crate::services::Services;
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result};
use super::PredicateGroup;

/// Runs predicate trees against the index and the store.
pub struct QueryExecutor<B: StorageBackend, I: IndexBackend> {
    services: Arc<Services<B, I>>,
}

impl<B: StorageBackend, I: IndexBackend> Clone for QueryExecutor<B, I> {
    fn clone(&self) -> Self {
        Self { services: Arc::clone(&self.services) }
    }
}

impl<B: StorageBackend, I: IndexBackend> QueryExecutor<B, I> {
    pub fn new(services: Arc<Services<B, I>>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services<B, I>> {
        &self.services
    }

    /// Execute `tree` over one half of the graph.
    ///
    /// Without a type clause the store is scanned in full and every entity is
    /// checked against the tree. With one, index candidates are loaded in
    /// index order and re-checked only when the tree has an inexact leaf.
    /// Entities hidden from `ctx` by the access policy are dropped.
    pub fn execute(&self, tree: &PredicateGroup, kind: EntityKind, ctx: &SecurityContext) -> Result<Vec<Entity>> {
        let schema = self.services.schema();
        let query = self.services.index().translate(tree, schema)?;

        if let Some(type_name) = tree.type_name() {
            if !schema.contains_type(type_name) {
                return Err(Error::Query(format!("unknown type '{type_name}'")));
            }
            if let Some(key) = tree.referenced_keys()
                .into_iter()
                .find(|k| !is_system_key(k) && schema.key(type_name, k).is_none())
            {
                return Err(Error::Query(format!("type '{type_name}' has no property '{key}'")));
            }
        }

        let backend = self.services.backend();
        let tx = backend.begin_tx(TxMode::ReadOnly)?;

        let candidates = if query.has_type_clause() {
            let ids = self.services.index().execute_query(kind, &query)?;
            let mut loaded = Vec::with_capacity(ids.len());
            for id in ids {
                // Ids may outlive their entity between index and store.
                if let Some(entity) = backend.get_entity(&tx, id)? {
                    loaded.push(entity);
                }
            }
            loaded
        } else {
            debug!(target: "trellis::search", ?kind, "no type clause, scanning store");
            backend.scan_all_entities(&tx, kind)?
        };
        backend.commit_tx(tx)?;

        let total = candidates.len();
        let exact = query.has_type_clause() && tree.is_exact_match();
        let policy = self.services.policy();
        let results: Vec<Entity> = candidates
            .into_iter()
            .filter(|e| exact || tree.include_in_result(e))
            .filter(|e| policy.is_visible(ctx, e))
            .collect();

        debug!(
            target: "trellis::search",
            candidates = total,
            results = results.len(),
            exact,
            %ctx,
            "query executed"
        );
        Ok(results)
    }
}
