//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It uses ordered maps protected by RwLock.
//!
//! ## Transactions
//!
//! Writes are applied immediately and every write records its inverse in the
//! transaction's undo log. `rollback_tx()` replays the log backwards;
//! `commit_tx()` checks constraints and discards the log, or replays it when a
//! constraint is violated.
//!
//! ## Limitations
//!
//! - **No isolation**: uncommitted writes are visible to other transactions.
//!   Safe for single-writer use only.
//! - **No property indexes**: the label index is the only secondary structure.
//!
//! Use this backend for:
//! - Testing search, bulk mutation and the facade
//! - Embedding trellis in applications that don't need persistence

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::model::*;
use crate::tx::{Transaction, TxMode, TxId};
use crate::{Error, Result};
use super::{BackendCapabilities, ConstraintType, StorageBackend};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage. Clones share the same graph.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    relationships: RwLock<BTreeMap<RelId, Relationship>>,
    /// node_id → list of relationship IDs
    adjacency: RwLock<HashMap<NodeId, Vec<RelId>>>,
    /// label → node IDs (poor man's label index)
    label_index: RwLock<HashMap<String, Vec<NodeId>>>,
    constraints: RwLock<Vec<(String, String, ConstraintType)>>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    shut_down: AtomicBool,
}

/// Transaction counters, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(BTreeMap::new()),
                relationships: RwLock::new(BTreeMap::new()),
                adjacency: RwLock::new(HashMap::new()),
                label_index: RwLock::new(HashMap::new()),
                constraints: RwLock::new(Vec::new()),
                next_node_id: AtomicU64::new(1),
                next_rel_id: AtomicU64::new(1),
                next_tx_id: AtomicU64::new(1),
                begun: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                rolled_back: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn tx_stats(&self) -> TxStats {
        TxStats {
            begun: self.inner.begun.load(Ordering::Relaxed),
            committed: self.inner.committed.load(Ordering::Relaxed),
            rolled_back: self.inner.rolled_back.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of every entity of one kind, in id order, outside any transaction.
    pub(crate) fn snapshot(&self, kind: EntityKind) -> Vec<Entity> {
        match kind {
            EntityKind::Node => self.inner.nodes.read().values().cloned().map(Entity::Node).collect(),
            EntityKind::Relationship => self.inner.relationships.read()
                .values()
                .cloned()
                .map(Entity::Relationship)
                .collect(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// Inverse of one applied write.
#[derive(Debug)]
enum Undo {
    RemoveNode(NodeId),
    RestoreNode(Node),
    NodeProperty { id: NodeId, key: String, previous: Option<Value> },
    NodeLabels { id: NodeId, labels: Labels },
    RemoveRelationship(RelId),
    RestoreRelationship(Relationship),
    RelationshipProperty { id: RelId, key: String, previous: Option<Value> },
}

/// In-memory transaction carrying its undo log.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    undo: Vec<Undo>,
}

impl MemoryTx {
    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(Error::TxError(format!("write attempted in read-only {}", self.id))),
        }
    }
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

// ============================================================================
// Raw mutations (no undo recording)
// ============================================================================

impl MemoryInner {
    fn index_labels(&self, id: NodeId, old: &[String], new: &[String]) {
        let mut idx = self.label_index.write();
        for label in old {
            if let Some(ids) = idx.get_mut(label) {
                ids.retain(|nid| *nid != id);
            }
        }
        for label in new {
            idx.entry(label.clone()).or_default().push(id);
        }
    }

    fn insert_node(&self, node: Node) {
        let id = node.id;
        self.index_labels(id, &[], &node.labels);
        self.nodes.write().insert(id, node);
        self.adjacency.write().entry(id).or_default();
    }

    fn take_node(&self, id: NodeId) -> Option<Node> {
        let removed = self.nodes.write().remove(&id);
        self.adjacency.write().remove(&id);
        if let Some(node) = &removed {
            self.index_labels(id, &node.labels, &[]);
        }
        removed
    }

    fn insert_relationship(&self, rel: Relationship) {
        let (id, src, dst) = (rel.id, rel.src, rel.dst);
        self.relationships.write().insert(id, rel);
        let mut adj = self.adjacency.write();
        adj.entry(src).or_default().push(id);
        if src != dst {
            adj.entry(dst).or_default().push(id);
        }
    }

    fn take_relationship(&self, id: RelId) -> Option<Relationship> {
        let removed = self.relationships.write().remove(&id);
        if let Some(rel) = &removed {
            let mut adj = self.adjacency.write();
            if let Some(rels) = adj.get_mut(&rel.src) {
                rels.retain(|rid| *rid != id);
            }
            if rel.src != rel.dst {
                if let Some(rels) = adj.get_mut(&rel.dst) {
                    rels.retain(|rid| *rid != id);
                }
            }
        }
        removed
    }

    fn put_node_property(&self, id: NodeId, key: &str, val: Option<Value>) -> Result<Option<Value>> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        Ok(match val {
            Some(v) => node.properties.insert(key.to_string(), v),
            None => node.properties.remove(key),
        })
    }

    fn put_relationship_property(&self, id: RelId, key: &str, val: Option<Value>) -> Result<Option<Value>> {
        let mut rels = self.relationships.write();
        let rel = rels.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        Ok(match val {
            Some(v) => rel.properties.insert(key.to_string(), v),
            None => rel.properties.remove(key),
        })
    }

    fn replace_labels(&self, id: NodeId, labels: Labels) -> Result<Labels> {
        let previous = {
            let mut nodes = self.nodes.write();
            let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
            std::mem::replace(&mut node.labels, labels.clone())
        };
        self.index_labels(id, &previous, &labels);
        Ok(previous)
    }

    /// Replay an undo log backwards.
    fn undo(&self, log: Vec<Undo>) {
        for op in log.into_iter().rev() {
            // Targets of an undo entry exist by construction; a missing one
            // means a later entry already removed it.
            let _ = match op {
                Undo::RemoveNode(id) => { self.take_node(id); Ok(()) }
                Undo::RestoreNode(node) => { self.insert_node(node); Ok(()) }
                Undo::NodeProperty { id, key, previous } => {
                    self.put_node_property(id, &key, previous).map(drop)
                }
                Undo::NodeLabels { id, labels } => self.replace_labels(id, labels).map(drop),
                Undo::RemoveRelationship(id) => { self.take_relationship(id); Ok(()) }
                Undo::RestoreRelationship(rel) => { self.insert_relationship(rel); Ok(()) }
                Undo::RelationshipProperty { id, key, previous } => {
                    self.put_relationship_property(id, &key, previous).map(drop)
                }
            };
        }
    }

    fn check_constraints(&self) -> Result<()> {
        let constraints = self.constraints.read();
        if constraints.is_empty() {
            return Ok(());
        }
        let idx = self.label_index.read();
        let nodes = self.nodes.read();

        for (label, property, kind) in constraints.iter() {
            let ids = idx.get(label).map(Vec::as_slice).unwrap_or_default();
            let mut seen: HashMap<String, NodeId> = HashMap::new();
            for node in ids.iter().filter_map(|id| nodes.get(id)) {
                match (kind, node.get(property)) {
                    (ConstraintType::Exists, None) => {
                        return Err(Error::ConstraintViolation(format!(
                            "Node {} with label {label} has no property '{property}'", node.id
                        )));
                    }
                    (ConstraintType::Unique, Some(value)) => {
                        let fingerprint = format!("{}:{value}", value.type_name());
                        if let Some(other) = seen.insert(fingerprint, node.id) {
                            return Err(Error::ConstraintViolation(format!(
                                "Nodes {other} and {} share {label}.{property} = {value}", node.id
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    fn shutdown(&self) -> Result<()> {
        self.inner.shut_down.store(true, Ordering::Release);
        Ok(())
    }

    fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(Error::StorageError("memory backend is shut down".into()));
        }
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        self.inner.begun.fetch_add(1, Ordering::Relaxed);
        Ok(MemoryTx { id, mode, undo: Vec::new() })
    }

    fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        if let Err(e) = self.inner.check_constraints() {
            debug!(target: "trellis::storage", tx = %tx.id, writes = tx.undo.len(), "commit rejected, undoing");
            self.inner.undo(tx.undo);
            self.inner.rolled_back.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        self.inner.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        debug!(target: "trellis::storage", tx = %tx.id, writes = tx.undo.len(), "rolling back");
        self.inner.undo(tx.undo);
        self.inner.rolled_back.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    fn create_node(&self, tx: &mut MemoryTx, labels: &[&str], props: PropertyMap) -> Result<NodeId> {
        tx.ensure_writable()?;
        let id = NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed));
        let node = Node {
            id,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties: props,
        };
        self.inner.insert_node(node);
        tx.undo.push(Undo::RemoveNode(id));
        Ok(id)
    }

    fn get_node(&self, _tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        Ok(self.inner.nodes.read().get(&id).cloned())
    }

    fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<bool> {
        tx.ensure_writable()?;
        // Can't delete a connected node
        {
            let adj = self.inner.adjacency.read();
            if let Some(rels) = adj.get(&id) {
                if !rels.is_empty() {
                    return Err(Error::ConstraintViolation(
                        format!("Cannot delete node {id} with {} relationships. Delete relationships first.", rels.len())
                    ));
                }
            }
        }

        let removed = self.inner.take_node(id);
        let existed = removed.is_some();
        if let Some(node) = removed {
            tx.undo.push(Undo::RestoreNode(node));
        }
        Ok(existed)
    }

    fn set_node_property(&self, tx: &mut MemoryTx, id: NodeId, key: &str, val: Value) -> Result<()> {
        tx.ensure_writable()?;
        let previous = self.inner.put_node_property(id, key, Some(val))?;
        tx.undo.push(Undo::NodeProperty { id, key: key.to_string(), previous });
        Ok(())
    }

    fn remove_node_property(&self, tx: &mut MemoryTx, id: NodeId, key: &str) -> Result<()> {
        tx.ensure_writable()?;
        let previous = self.inner.put_node_property(id, key, None)?;
        if previous.is_some() {
            tx.undo.push(Undo::NodeProperty { id, key: key.to_string(), previous });
        }
        Ok(())
    }

    fn add_label(&self, tx: &mut MemoryTx, id: NodeId, label: &str) -> Result<()> {
        tx.ensure_writable()?;
        let current = self.get_node(tx, id)?
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?
            .labels;
        if !current.iter().any(|l| l == label) {
            let mut next = current;
            next.push(label.to_string());
            let previous = self.inner.replace_labels(id, next)?;
            tx.undo.push(Undo::NodeLabels { id, labels: previous });
        }
        Ok(())
    }

    fn remove_label(&self, tx: &mut MemoryTx, id: NodeId, label: &str) -> Result<()> {
        tx.ensure_writable()?;
        let current = self.get_node(tx, id)?
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?
            .labels;
        if current.iter().any(|l| l == label) {
            let next: Labels = current.into_iter().filter(|l| l != label).collect();
            let previous = self.inner.replace_labels(id, next)?;
            tx.undo.push(Undo::NodeLabels { id, labels: previous });
        }
        Ok(())
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    fn create_relationship(
        &self,
        tx: &mut MemoryTx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        tx.ensure_writable()?;
        // Verify both nodes exist
        {
            let nodes = self.inner.nodes.read();
            if !nodes.contains_key(&src) {
                return Err(Error::NotFound(format!("Source node {src}")));
            }
            if !nodes.contains_key(&dst) {
                return Err(Error::NotFound(format!("Target node {dst}")));
            }
        }

        let id = RelId(self.inner.next_rel_id.fetch_add(1, Ordering::Relaxed));
        self.inner.insert_relationship(Relationship {
            id,
            src,
            dst,
            rel_type: rel_type.to_string(),
            properties: props,
        });
        tx.undo.push(Undo::RemoveRelationship(id));
        Ok(id)
    }

    fn get_relationship(&self, _tx: &MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        Ok(self.inner.relationships.read().get(&id).cloned())
    }

    fn delete_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<bool> {
        tx.ensure_writable()?;
        let removed = self.inner.take_relationship(id);
        let existed = removed.is_some();
        if let Some(rel) = removed {
            tx.undo.push(Undo::RestoreRelationship(rel));
        }
        Ok(existed)
    }

    fn set_relationship_property(&self, tx: &mut MemoryTx, id: RelId, key: &str, val: Value) -> Result<()> {
        tx.ensure_writable()?;
        let previous = self.inner.put_relationship_property(id, key, Some(val))?;
        tx.undo.push(Undo::RelationshipProperty { id, key: key.to_string(), previous });
        Ok(())
    }

    fn remove_relationship_property(&self, tx: &mut MemoryTx, id: RelId, key: &str) -> Result<()> {
        tx.ensure_writable()?;
        let previous = self.inner.put_relationship_property(id, key, None)?;
        if previous.is_some() {
            tx.undo.push(Undo::RelationshipProperty { id, key: key.to_string(), previous });
        }
        Ok(())
    }

    fn get_relationships(
        &self,
        _tx: &MemoryTx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        let adj = self.inner.adjacency.read();
        let rels = self.inner.relationships.read();

        let rel_ids = adj.get(&node).cloned().unwrap_or_default();
        let mut result = Vec::new();

        for rid in rel_ids {
            if let Some(rel) = rels.get(&rid) {
                let matches_dir = match dir {
                    Direction::Outgoing => rel.src == node,
                    Direction::Incoming => rel.dst == node,
                    Direction::Both => true,
                };
                let matches_type = rel_type.is_none_or(|t| rel.rel_type == t);

                if matches_dir && matches_type {
                    result.push(rel.clone());
                }
            }
        }

        Ok(result)
    }

    // ========================================================================
    // Scan
    // ========================================================================

    fn all_nodes(&self, _tx: &MemoryTx) -> Result<Vec<Node>> {
        Ok(self.inner.nodes.read().values().cloned().collect())
    }

    fn all_relationships(&self, _tx: &MemoryTx) -> Result<Vec<Relationship>> {
        Ok(self.inner.relationships.read().values().cloned().collect())
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    fn create_constraint(&self, label: &str, property: &str, constraint_type: ConstraintType) -> Result<()> {
        let mut constraints = self.inner.constraints.write();
        constraints.retain(|(l, p, _)| !(l == label && p == property));
        constraints.push((label.to_string(), property.to_string(), constraint_type));
        Ok(())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities { max_batch_size: None }
    }
}

// ============================================================================
// Tests
// ============================================================================
