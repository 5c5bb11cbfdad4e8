//! Entity: a node or a relationship, addressed uniformly.
//!
//! Search, bulk mutation and the facade all work on entities so that the same
//! predicate tree or mutation step applies to both halves of the graph.

use serde::{Deserialize, Serialize};
use super::{Node, NodeId, PropertyMap, RelId, Relationship, Value};

/// Property holding an entity's type discriminator.
pub const TYPE_KEY: &str = "type";

/// Property holding an entity's stable public identity.
pub const UUID_KEY: &str = "uuid";

/// Which half of the graph an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Relationship,
}

/// Identifier of either a node or a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Node(NodeId),
    Relationship(RelId),
}

impl EntityId {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityId::Node(_) => EntityKind::Node,
            EntityId::Relationship(_) => EntityKind::Relationship,
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Node(id) => write!(f, "node:{id}"),
            EntityId::Relationship(id) => write!(f, "rel:{id}"),
        }
    }
}

impl From<NodeId> for EntityId {
    fn from(id: NodeId) -> Self { EntityId::Node(id) }
}

impl From<RelId> for EntityId {
    fn from(id: RelId) -> Self { EntityId::Relationship(id) }
}

/// A node or relationship snapshot read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Node(Node),
    Relationship(Relationship),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Node(n) => EntityId::Node(n.id),
            Entity::Relationship(r) => EntityId::Relationship(r.id),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.id().kind()
    }

    pub fn properties(&self) -> &PropertyMap {
        match self {
            Entity::Node(n) => &n.properties,
            Entity::Relationship(r) => &r.properties,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties().get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.properties().contains_key(key)
    }

    /// The entity's type name: the `type` property when present, otherwise
    /// the first label of a node or the type of a relationship.
    pub fn type_name(&self) -> Option<&str> {
        if let Some(t) = self.get(TYPE_KEY).and_then(Value::as_str) {
            return Some(t);
        }
        match self {
            Entity::Node(n) => n.labels.first().map(String::as_str),
            Entity::Relationship(r) => Some(r.rel_type.as_str()),
        }
    }

    pub fn uuid(&self) -> Option<&str> {
        self.get(UUID_KEY).and_then(Value::as_str)
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Entity::Node(n) => Some(n),
            Entity::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Entity::Relationship(r) => Some(r),
            Entity::Node(_) => None,
        }
    }
}

impl From<Node> for Entity {
    fn from(n: Node) -> Self { Entity::Node(n) }
}

impl From<Relationship> for Entity {
    fn from(r: Relationship) -> Self { Entity::Relationship(r) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_prefers_property() {
        let node = Node::new(NodeId(1))
            .with_labels(["Person"])
            .with_property(TYPE_KEY, "Employee");
        assert_eq!(Entity::from(node).type_name(), Some("Employee"));
    }

    #[test]
    fn test_type_name_falls_back() {
        let node = Node::new(NodeId(1)).with_labels(["Person"]);
        assert_eq!(Entity::from(node).type_name(), Some("Person"));

        let rel = Relationship::new(RelId(4), NodeId(1), NodeId(2), "KNOWS");
        let entity = Entity::from(rel);
        assert_eq!(entity.type_name(), Some("KNOWS"));
        assert_eq!(entity.kind(), EntityKind::Relationship);
        assert_eq!(entity.id().to_string(), "rel:4");
    }
}
