//! # Search
//!
//! Boolean predicate trees, their execution against the index and the store,
//! and the fluent [`Query`] builder the facade hands out.
//!
//! ```text
//! Query ──build──▶ PredicateGroup ──translate──▶ IndexQuery
//!                        │                           │
//!                        │                    candidate ids
//!                        ▼                           ▼
//!               include_in_result ◀──────── load from store
//! ```

pub mod predicate;
pub mod executor;
pub mod query;

pub use predicate::{Occur, Comparison, Predicate, PredicateGroup, SearchAttribute};
pub use executor::QueryExecutor;
pub use query::{Query, SearchResult};
