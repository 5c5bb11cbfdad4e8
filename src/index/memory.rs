//! In-memory index over a `MemoryBackend`.
//!
//! Evaluates queries against a snapshot of the backend in id order. Text is
//! analyzed (lower-cased, non-alphanumerics dropped) before substring
//! matching, and range bounds are both treated as inclusive, so `Contains`
//! and `Range` leaves return a superset of the exact result. Exclusions are
//! only applied when the excluded clause is exact, which keeps every answer a
//! superset.

use std::cmp::Ordering;

use crate::model::{Entity, EntityId, EntityKind, Value};
use crate::search::Occur;
use crate::storage::MemoryBackend;
use crate::Result;
use super::{IndexBackend, IndexQuery};

/// Scan-based index sharing the graph of a `MemoryBackend`.
#[derive(Clone)]
pub struct MemoryIndex {
    backend: MemoryBackend,
}

impl MemoryIndex {
    pub fn new(backend: MemoryBackend) -> Self {
        Self { backend }
    }
}

/// Lower-case and drop everything but letters and digits.
fn analyze(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn admits(query: &IndexQuery, entity: &Entity) -> bool {
    match query {
        IndexQuery::MatchAll => true,
        IndexQuery::Type(t) => entity.type_name() == Some(t.as_str()),
        IndexQuery::Term { key, value } => entity.get(key).is_some_and(|v| {
            v == value || v.compare(value) == Some(Ordering::Equal)
        }),
        IndexQuery::Contains { key, text } => entity
            .get(key)
            .is_some_and(|v| !v.is_null() && analyze(&v.to_text()).contains(&analyze(text))),
        IndexQuery::Range { key, lower, upper } => entity.get(key).is_some_and(|v| in_range(v, lower, upper)),
        IndexQuery::Exists { key } => entity.get(key).is_some_and(|v| !v.is_null()),
        IndexQuery::Boolean(clauses) => {
            let mut any_should = false;
            let mut should_hit = false;
            for (occur, q) in clauses {
                match occur {
                    Occur::Must if !admits(q, entity) => return false,
                    Occur::MustNot if q.is_exact() && admits(q, entity) => return false,
                    Occur::Should => {
                        any_should = true;
                        should_hit = should_hit || admits(q, entity);
                    }
                    _ => {}
                }
            }
            !any_should || should_hit
        }
    }
}

fn in_range(value: &Value, lower: &Option<Value>, upper: &Option<Value>) -> bool {
    let above = lower.as_ref().is_none_or(|lo| {
        matches!(value.compare(lo), Some(Ordering::Greater | Ordering::Equal))
    });
    let below = upper.as_ref().is_none_or(|hi| {
        matches!(value.compare(hi), Some(Ordering::Less | Ordering::Equal))
    });
    above && below
}

impl IndexBackend for MemoryIndex {
    fn execute_query(&self, kind: EntityKind, query: &IndexQuery) -> Result<Vec<EntityId>> {
        Ok(self.backend
            .snapshot(kind)
            .iter()
            .filter(|e| admits(query, e))
            .map(Entity::id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{props, NodeId};
    use crate::storage::StorageBackend;
    use crate::tx::TxMode;

    fn fixture() -> (MemoryIndex, Vec<NodeId>) {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).unwrap();
        let ids = vec![
            db.create_node(&mut tx, &["Person"], props([("type", Value::from("Person")), ("name", Value::from("Ada-Lovelace")), ("age", Value::from(36))])).unwrap(),
            db.create_node(&mut tx, &["Person"], props([("type", Value::from("Person")), ("name", Value::from("Grace")), ("age", Value::from(40))])).unwrap(),
            db.create_node(&mut tx, &["City"], props([("type", Value::from("City")), ("name", Value::from("Adana"))])).unwrap(),
        ];
        db.commit_tx(tx).unwrap();
        (MemoryIndex::new(db), ids)
    }

    #[test]
    fn test_contains_is_analyzed() {
        let (index, ids) = fixture();
        let q = IndexQuery::Contains { key: "name".into(), text: "ADAL".into() };
        assert_eq!(index.execute_query(EntityKind::Node, &q).unwrap(), vec![EntityId::Node(ids[0])]);
    }

    #[test]
    fn test_range_upper_bound_is_inclusive() {
        let (index, ids) = fixture();
        let q = IndexQuery::Range { key: "age".into(), lower: Some(Value::Int(36)), upper: Some(Value::Int(40)) };
        assert_eq!(
            index.execute_query(EntityKind::Node, &q).unwrap(),
            vec![EntityId::Node(ids[0]), EntityId::Node(ids[1])]
        );
    }

    #[test]
    fn test_inexact_exclusion_is_not_applied() {
        let (index, ids) = fixture();
        let q = IndexQuery::Boolean(vec![
            (Occur::Must, IndexQuery::Type("Person".into())),
            (Occur::MustNot, IndexQuery::Contains { key: "name".into(), text: "grace".into() }),
            (Occur::MustNot, IndexQuery::Term { key: "age".into(), value: Value::Int(36) }),
        ]);
        assert_eq!(index.execute_query(EntityKind::Node, &q).unwrap(), vec![EntityId::Node(ids[1])]);
    }
}
