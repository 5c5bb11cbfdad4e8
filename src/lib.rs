//! # trellis: Query and Mutation Core for Property Graphs
//!
//! The application layer between callers and a graph store: boolean predicate
//! search with exact re-validation of inexact index hits, and a bulk mutation
//! engine that walks unbounded populations in fixed-size transactional batches.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` and `IndexBackend` are the contracts with
//!    the store and the index; everything above them is backend-agnostic
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Entity`, `Value` cross all boundaries
//! 3. **Explicit context**: `Services` owns backend, index and schema; nothing is global
//! 4. **Isolation**: one bad record never aborts a batch, one bad batch never aborts a job
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis::{App, SecurityContext, Services, ServicesConfig};
//! use trellis::model::props;
//! use trellis::schema::{PropertyKey, SchemaRegistry, ValueType};
//!
//! # fn main() -> trellis::Result<()> {
//! let schema = SchemaRegistry::builder()
//!     .register("Person", [PropertyKey::new("name", ValueType::String)])
//!     .build();
//! let services = Services::open_memory(ServicesConfig::default(), schema)?;
//!
//! let app = App::new(services, SecurityContext::super_user());
//! app.create_node("Person", props([("name", "Ada")]))?;
//!
//! let people = app.node_query().and_type("Person").and("name", "Ada").get_as_list()?;
//! assert_eq!(people.len(), 1);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod schema;
pub mod security;
pub mod storage;
pub mod tx;
pub mod index;
pub mod search;
pub mod bulk;
pub mod maintenance;
pub mod services;
pub mod app;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Entity, EntityId, EntityKind, Value, PropertyMap,
    NodeId, RelId, Direction,
};

// ============================================================================
// Re-exports: Storage, index, transactions
// ============================================================================

pub use storage::{StorageBackend, BackendConfig, ConstraintType, BackendCapabilities, MemoryBackend};
pub use index::{IndexBackend, IndexQuery, MemoryIndex};
pub use tx::{Transaction, TxMode, TxId};

// ============================================================================
// Re-exports: Search, bulk, facade
// ============================================================================

pub use search::{Occur, Comparison, Predicate, PredicateGroup, SearchAttribute, QueryExecutor, Query};
pub use bulk::{BulkMutation, BulkStep, StepFailure, StepResult, BulkProgress, CancellationFlag};
pub use maintenance::{MaintenanceCommand, BulkChangePropertyKey, MaintenanceReport};
pub use security::SecurityContext;
pub use services::{Services, ServicesConfig};
pub use app::App;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Query translation error: {0}")]
    QueryTranslation(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conversion error on '{key}': {message}")]
    Conversion { key: String, message: String },

    #[error("Validation error on {type_name}.{key}: {message}")]
    Validation {
        type_name: String,
        key: String,
        message: String,
        /// Allowed values, populated by enumeration validators.
        allowed: Vec<Value>,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
