//! # Property Graph Model
//!
//! Clean DTOs that define the property graph.
//! These types cross every boundary: storage ↔ index ↔ search ↔ facade.
//!
//! This module is pure data with no I/O.

pub mod node;
pub mod relationship;
pub mod entity;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId, Labels};
pub use relationship::{Relationship, RelId, Direction};
pub use entity::{Entity, EntityId, EntityKind, TYPE_KEY, UUID_KEY};
pub use value::Value;
pub use property_map::{PropertyMap, props};
