//! Commands behind the facade.
//!
//! Each command is built once per facade from the shared services and the
//! caller's context, then reused. Write commands run inside a transaction
//! owned by the facade.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::index::IndexBackend;
use crate::model::{
    EntityKind, Node, NodeId, PropertyMap, RelId, Relationship, Value, TYPE_KEY, UUID_KEY,
};
use crate::search::{Query, QueryExecutor};
use crate::security::SecurityContext;
use crate::services::Services;
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// A facade command, constructed from services and caller context.
pub trait Command<B: StorageBackend, I: IndexBackend>: Any {
    fn build(services: &Arc<Services<B, I>>, ctx: &Arc<SecurityContext>) -> Self
    where
        Self: Sized;
}

/// Convert, validate and stamp the attributes of a new entity.
fn prepare_properties<B: StorageBackend, I: IndexBackend>(
    services: &Services<B, I>,
    type_name: &str,
    attributes: PropertyMap,
) -> Result<PropertyMap> {
    let mut props = services.schema().prepare(type_name, attributes)?;
    props.insert(TYPE_KEY.to_string(), Value::from(type_name));
    if !props.get(UUID_KEY).is_some_and(Value::is_string) {
        props.insert(UUID_KEY.to_string(), Value::from(Uuid::new_v4().simple().to_string()));
    }
    Ok(props)
}

// ============================================================================
// Create
// ============================================================================

pub struct CreateNodeCommand<B: StorageBackend, I: IndexBackend> {
    services: Arc<Services<B, I>>,
    ctx: Arc<SecurityContext>,
}

impl<B: StorageBackend, I: IndexBackend> Command<B, I> for CreateNodeCommand<B, I> {
    fn build(services: &Arc<Services<B, I>>, ctx: &Arc<SecurityContext>) -> Self {
        Self { services: Arc::clone(services), ctx: Arc::clone(ctx) }
    }
}

impl<B: StorageBackend, I: IndexBackend> CreateNodeCommand<B, I> {
    /// Create a node labelled with its type.
    pub fn execute(&self, tx: &mut B::Tx, type_name: &str, attributes: PropertyMap) -> Result<Node> {
        let props = prepare_properties(&self.services, type_name, attributes)?;
        let backend = self.services.backend();
        let id = backend.create_node(tx, &[type_name], props)?;
        debug!(target: "trellis::app", %id, type_name, ctx = %self.ctx, "node created");
        backend.get_node(tx, id)?.ok_or_else(|| Error::NotFound(format!("Node {id}")))
    }
}

pub struct CreateRelationshipCommand<B: StorageBackend, I: IndexBackend> {
    services: Arc<Services<B, I>>,
    ctx: Arc<SecurityContext>,
}

impl<B: StorageBackend, I: IndexBackend> Command<B, I> for CreateRelationshipCommand<B, I> {
    fn build(services: &Arc<Services<B, I>>, ctx: &Arc<SecurityContext>) -> Self {
        Self { services: Arc::clone(services), ctx: Arc::clone(ctx) }
    }
}

impl<B: StorageBackend, I: IndexBackend> CreateRelationshipCommand<B, I> {
    /// Create a relationship whose type is also its entity type.
    pub fn execute(
        &self,
        tx: &mut B::Tx,
        from: NodeId,
        to: NodeId,
        rel_type: &str,
        attributes: PropertyMap,
    ) -> Result<Relationship> {
        let props = prepare_properties(&self.services, rel_type, attributes)?;
        let backend = self.services.backend();
        let id = backend.create_relationship(tx, from, to, rel_type, props)?;
        debug!(target: "trellis::app", %id, %from, %to, rel_type, ctx = %self.ctx, "relationship created");
        backend.get_relationship(tx, id)?.ok_or_else(|| Error::NotFound(format!("Relationship {id}")))
    }
}

// ============================================================================
// Delete
// ============================================================================

pub struct DeleteNodeCommand<B: StorageBackend, I: IndexBackend> {
    services: Arc<Services<B, I>>,
}

impl<B: StorageBackend, I: IndexBackend> Command<B, I> for DeleteNodeCommand<B, I> {
    fn build(services: &Arc<Services<B, I>>, _ctx: &Arc<SecurityContext>) -> Self {
        Self { services: Arc::clone(services) }
    }
}

impl<B: StorageBackend, I: IndexBackend> DeleteNodeCommand<B, I> {
    /// Delete a node together with its relationships.
    pub fn execute(&self, tx: &mut B::Tx, id: NodeId) -> Result<()> {
        if !self.services.backend().detach_delete_node(tx, id)? {
            return Err(Error::NotFound(format!("Node {id}")));
        }
        debug!(target: "trellis::app", %id, "node deleted");
        Ok(())
    }
}

pub struct DeleteRelationshipCommand<B: StorageBackend, I: IndexBackend> {
    services: Arc<Services<B, I>>,
}

impl<B: StorageBackend, I: IndexBackend> Command<B, I> for DeleteRelationshipCommand<B, I> {
    fn build(services: &Arc<Services<B, I>>, _ctx: &Arc<SecurityContext>) -> Self {
        Self { services: Arc::clone(services) }
    }
}

impl<B: StorageBackend, I: IndexBackend> DeleteRelationshipCommand<B, I> {
    pub fn execute(&self, tx: &mut B::Tx, id: RelId) -> Result<()> {
        if !self.services.backend().delete_relationship(tx, id)? {
            return Err(Error::NotFound(format!("Relationship {id}")));
        }
        debug!(target: "trellis::app", %id, "relationship deleted");
        Ok(())
    }
}

// ============================================================================
// Search
// ============================================================================

/// Hands out query builders bound to the caller's context.
pub struct SearchCommand<B: StorageBackend, I: IndexBackend> {
    executor: QueryExecutor<B, I>,
    ctx: Arc<SecurityContext>,
}

impl<B: StorageBackend, I: IndexBackend> Command<B, I> for SearchCommand<B, I> {
    fn build(services: &Arc<Services<B, I>>, ctx: &Arc<SecurityContext>) -> Self {
        Self { executor: QueryExecutor::new(Arc::clone(services)), ctx: Arc::clone(ctx) }
    }
}

impl<B: StorageBackend, I: IndexBackend> SearchCommand<B, I> {
    pub fn query(&self, kind: EntityKind) -> Query<B, I> {
        Query::new(self.executor.clone(), Arc::clone(&self.ctx), kind)
    }
}
