//! # Index Backend
//!
//! The index answers `IndexQuery`s with ordered candidate ids. Text and range
//! leaves are allowed to over-approximate: the search layer re-checks
//! candidates exactly whenever a query contains such a leaf.
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryIndex` | `memory` | Scans a `MemoryBackend` snapshot |

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::model::{EntityId, EntityKind, Value};
use crate::schema::SchemaRegistry;
use crate::search::{Occur, PredicateGroup};
use crate::Result;

pub use memory::MemoryIndex;

// ============================================================================
// Native query form
// ============================================================================

/// Query in the index's native form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexQuery {
    /// Every document.
    MatchAll,
    /// Documents of one entity type.
    Type(String),
    /// Property equals value.
    Term { key: String, value: Value },
    /// Analyzed text contains the given text.
    Contains { key: String, text: String },
    /// Property within bounds, both inclusive at index level.
    Range { key: String, lower: Option<Value>, upper: Option<Value> },
    /// Property present and not null.
    Exists { key: String },
    /// Boolean combination; each clause keeps its occurrence.
    Boolean(Vec<(Occur, IndexQuery)>),
}

impl IndexQuery {
    /// Whether the query narrows results to a type: a type clause reachable
    /// through `Must` clauses only.
    pub fn has_type_clause(&self) -> bool {
        match self {
            IndexQuery::Type(_) => true,
            IndexQuery::Boolean(clauses) => clauses
                .iter()
                .any(|(occur, q)| *occur == Occur::Must && q.has_type_clause()),
            _ => false,
        }
    }

    /// Whether index evaluation of this query is authoritative.
    pub fn is_exact(&self) -> bool {
        match self {
            IndexQuery::Contains { .. } | IndexQuery::Range { .. } => false,
            IndexQuery::Boolean(clauses) => clauses.iter().all(|(_, q)| q.is_exact()),
            _ => true,
        }
    }
}

// ============================================================================
// IndexBackend Trait
// ============================================================================

/// Contract with the index engine.
pub trait IndexBackend: Send + Sync + 'static {
    /// Translate a predicate tree into this index's native form.
    fn translate(&self, tree: &PredicateGroup, schema: &SchemaRegistry) -> Result<IndexQuery> {
        tree.to_index_query(schema)
    }

    /// Ordered candidate ids for a query over one half of the graph.
    fn execute_query(&self, kind: EntityKind, query: &IndexQuery) -> Result<Vec<EntityId>>;

    /// Release index resources.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
