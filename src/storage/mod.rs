//! # Storage Backend Trait
//!
//! This is THE contract between trellis and the graph store.
//! Every operation the query and mutation core needs is defined here.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory with undo-log rollback, for testing/embedding |
//!
//! ## Commit contract
//!
//! A failed `commit_tx()` leaves the store as if the transaction had been
//! rolled back: the backend undoes the transaction's writes before returning
//! the error, since the caller no longer owns the handle.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::{Error, Result};

pub use memory::{MemoryBackend, MemoryTx, TxStats};

// ============================================================================
// Backend Configuration
// ============================================================================

/// Configuration selecting a storage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory (no persistence)
    #[default]
    Memory,
}

// ============================================================================
// Constraint types
// ============================================================================

/// Type of constraint to create on a label+property pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintType {
    /// Property value must be unique for nodes with this label.
    Unique,
    /// Property must exist on all nodes with this label.
    Exists,
}

// ============================================================================
// Backend capabilities
// ============================================================================

/// What a backend can do. The bulk engine and facade consult this.
///
/// Defaults to no limits. Backends override via `capabilities()`.
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// Upper bound on entities written per transaction, if the backend has one.
    pub max_batch_size: Option<usize>,
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The universal storage contract.
///
/// Backends return `Error::StorageError("not supported")` for operations
/// they can't handle.
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes.
    fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction. On error the transaction is rolled back.
    fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction.
    fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties.
    fn create_node(&self, tx: &mut Self::Tx, labels: &[&str], props: PropertyMap) -> Result<NodeId>;

    /// Get a node by ID. Returns None if not found.
    fn get_node(&self, tx: &Self::Tx, id: NodeId) -> Result<Option<Node>>;

    /// Delete a node. Returns true if it existed.
    /// Fails if the node still has relationships.
    fn delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool>;

    /// Set a property on a node (upsert).
    fn set_node_property(&self, tx: &mut Self::Tx, id: NodeId, key: &str, val: Value) -> Result<()>;

    /// Remove a property from a node.
    fn remove_node_property(&self, tx: &mut Self::Tx, id: NodeId, key: &str) -> Result<()>;

    /// Add a label to a node.
    fn add_label(&self, tx: &mut Self::Tx, id: NodeId, label: &str) -> Result<()>;

    /// Remove a label from a node.
    fn remove_label(&self, tx: &mut Self::Tx, id: NodeId, label: &str) -> Result<()>;

    /// Delete a node and all its relationships in one operation.
    ///
    /// Default: get all relationships, delete each, then delete the node.
    fn detach_delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool> {
        let rels = self.get_relationships(tx, id, Direction::Both, None)?;
        for rel in &rels {
            self.delete_relationship(tx, rel.id)?;
        }
        self.delete_node(tx, id)
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship between two nodes.
    fn create_relationship(
        &self,
        tx: &mut Self::Tx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId>;

    /// Get a relationship by ID.
    fn get_relationship(&self, tx: &Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    /// Delete a relationship. Returns true if it existed.
    fn delete_relationship(&self, tx: &mut Self::Tx, id: RelId) -> Result<bool>;

    /// Set a property on a relationship (upsert).
    fn set_relationship_property(&self, tx: &mut Self::Tx, id: RelId, key: &str, val: Value) -> Result<()>;

    /// Remove a property from a relationship.
    fn remove_relationship_property(&self, tx: &mut Self::Tx, id: RelId, key: &str) -> Result<()>;

    /// Get all relationships of a node, optionally filtered by direction and type.
    fn get_relationships(
        &self,
        tx: &Self::Tx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>>;

    // ========================================================================
    // Entity-addressed property access
    // ========================================================================

    /// Load a node or relationship by id.
    fn get_entity(&self, tx: &Self::Tx, id: EntityId) -> Result<Option<Entity>> {
        Ok(match id {
            EntityId::Node(nid) => self.get_node(tx, nid)?.map(Entity::Node),
            EntityId::Relationship(rid) => self.get_relationship(tx, rid)?.map(Entity::Relationship),
        })
    }

    /// Current value of a property as seen inside `tx`.
    fn get_property(&self, tx: &Self::Tx, id: EntityId, key: &str) -> Result<Option<Value>> {
        let entity = self.get_entity(tx, id)?
            .ok_or_else(|| Error::NotFound(format!("Entity {id}")))?;
        Ok(entity.get(key).cloned())
    }

    fn has_property(&self, tx: &Self::Tx, id: EntityId, key: &str) -> Result<bool> {
        Ok(self.get_property(tx, id, key)?.is_some())
    }

    fn set_property(&self, tx: &mut Self::Tx, id: EntityId, key: &str, val: Value) -> Result<()> {
        match id {
            EntityId::Node(nid) => self.set_node_property(tx, nid, key, val),
            EntityId::Relationship(rid) => self.set_relationship_property(tx, rid, key, val),
        }
    }

    fn remove_property(&self, tx: &mut Self::Tx, id: EntityId, key: &str) -> Result<()> {
        match id {
            EntityId::Node(nid) => self.remove_node_property(tx, nid, key),
            EntityId::Relationship(rid) => self.remove_relationship_property(tx, rid, key),
        }
    }

    // ========================================================================
    // Scan
    // ========================================================================

    /// Return all nodes in insertion order.
    fn all_nodes(&self, tx: &Self::Tx) -> Result<Vec<Node>>;

    /// Return all relationships in insertion order.
    fn all_relationships(&self, tx: &Self::Tx) -> Result<Vec<Relationship>>;

    /// Full scan over one half of the graph.
    fn scan_all_entities(&self, tx: &Self::Tx, kind: EntityKind) -> Result<Vec<Entity>> {
        Ok(match kind {
            EntityKind::Node => self.all_nodes(tx)?.into_iter().map(Entity::Node).collect(),
            EntityKind::Relationship => self.all_relationships(tx)?
                .into_iter()
                .map(Entity::Relationship)
                .collect(),
        })
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Create a schema constraint, enforced at commit.
    ///
    /// Default returns "not supported".
    fn create_constraint(&self, _label: &str, _property: &str, _constraint_type: ConstraintType) -> Result<()> {
        Err(Error::StorageError("constraints not supported".into()))
    }

    // ========================================================================
    // Capability negotiation
    // ========================================================================

    /// Report what this backend can do.
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}
