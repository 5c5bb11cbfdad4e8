//! Predicate tree: leaves and groups of boolean search conditions.
//!
//! Every node carries an [`Occur`] telling its parent group how to combine
//! it. A tree has two evaluations that must agree on exact leaves: the
//! translation into an [`IndexQuery`] and the in-memory
//! [`include_in_result`](PredicateGroup::include_in_result) re-check.
//!
//! Group semantics, shared by both evaluations: every `Must` child matches,
//! no `MustNot` child matches, and when the group has `Should` children at
//! least one of them matches. An empty group matches everything.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::index::IndexQuery;
use crate::model::{Entity, Value, TYPE_KEY};
use crate::schema::{is_system_key, SchemaRegistry, ValueType};
use crate::{Error, Result};

/// Combination policy of a child within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Occur {
    /// Required (AND).
    Must,
    /// Optional (OR across the group's `Should` children).
    Should,
    /// Excluded (AND NOT).
    MustNot,
}

// ============================================================================
// Leaves
// ============================================================================

/// How a leaf compares its property against a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Property equals the value. `Equals(Null)` matches absent or null properties.
    Equals(Value),
    /// Case-insensitive substring of the property's text form.
    Contains(String),
    /// `lower <= value < upper`; a missing bound is open.
    Between { lower: Option<Value>, upper: Option<Value> },
    /// Property present and not null.
    Exists,
}

impl Comparison {
    /// Whether index evaluation alone is definitive for this comparison.
    pub fn is_exact(&self) -> bool {
        matches!(self, Comparison::Equals(_) | Comparison::Exists)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || a.compare(b) == Some(Ordering::Equal)
}

/// A single search condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    occur: Occur,
    key: String,
    comparison: Comparison,
}

impl Predicate {
    pub fn new(occur: Occur, key: impl Into<String>, comparison: Comparison) -> Self {
        Self { occur, key: key.into(), comparison }
    }

    pub fn equals(occur: Occur, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(occur, key, Comparison::Equals(value.into()))
    }

    /// Exact type match.
    pub fn of_type(occur: Occur, type_name: impl Into<String>) -> Self {
        Self::new(occur, TYPE_KEY, Comparison::Equals(Value::String(type_name.into())))
    }

    pub fn occur(&self) -> Occur {
        self.occur
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn comparison(&self) -> &Comparison {
        &self.comparison
    }

    pub fn is_exact_match(&self) -> bool {
        self.comparison.is_exact()
    }

    /// The type this leaf pins, if it is a type equality.
    pub fn type_name(&self) -> Option<&str> {
        match &self.comparison {
            Comparison::Equals(Value::String(t)) if self.key == TYPE_KEY => Some(t),
            _ => None,
        }
    }

    /// Exact evaluation against a live entity.
    pub fn include_in_result(&self, entity: &Entity) -> bool {
        if self.key == TYPE_KEY {
            if let Comparison::Equals(Value::String(t)) = &self.comparison {
                return entity.type_name() == Some(t.as_str());
            }
        }
        let value = entity.get(&self.key).filter(|v| !v.is_null());
        match (&self.comparison, value) {
            (Comparison::Equals(Value::Null), v) => v.is_none(),
            (Comparison::Equals(expected), Some(v)) => values_equal(v, expected),
            (Comparison::Contains(text), Some(v)) => {
                v.to_text().to_lowercase().contains(&text.to_lowercase())
            }
            (Comparison::Between { lower, upper }, Some(v)) => {
                let above = lower.as_ref().is_none_or(|lo| {
                    matches!(v.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                });
                let below = upper.as_ref().is_none_or(|hi| v.compare(hi) == Some(Ordering::Less));
                above && below
            }
            (Comparison::Exists, Some(_)) => true,
            (_, None) => false,
        }
    }

    /// Translate into the index's native form, checking the key and the
    /// comparison against the schema. `scope` is the type the enclosing tree
    /// is restricted to, if any.
    pub fn to_index_query(&self, schema: &SchemaRegistry, scope: Option<&str>) -> Result<IndexQuery> {
        let value_type = if is_system_key(&self.key) {
            ValueType::String
        } else {
            scope
                .and_then(|t| schema.key(t, &self.key))
                .or_else(|| schema.find_key(&self.key))
                .ok_or_else(|| Error::QueryTranslation(format!("unknown property key '{}'", self.key)))?
                .value_type()
        };
        let key = self.key.clone();

        match &self.comparison {
            Comparison::Equals(Value::Null) => Ok(IndexQuery::Boolean(vec![
                (Occur::MustNot, IndexQuery::Exists { key }),
            ])),
            Comparison::Equals(value) if self.key == TYPE_KEY => match value {
                Value::String(t) => Ok(IndexQuery::Type(t.clone())),
                other => Err(Error::QueryTranslation(format!(
                    "type must be compared with a string, got {}", other.type_name()
                ))),
            },
            Comparison::Equals(value) => Ok(IndexQuery::Term { key, value: value.clone() }),
            Comparison::Contains(text) => {
                if !value_type.is_textual() {
                    return Err(Error::QueryTranslation(format!(
                        "text search on non-text key '{}' ({value_type:?})", self.key
                    )));
                }
                Ok(IndexQuery::Contains { key, text: text.clone() })
            }
            Comparison::Between { lower, upper } => {
                if !value_type.is_ordered() {
                    return Err(Error::QueryTranslation(format!(
                        "range search on unordered key '{}' ({value_type:?})", self.key
                    )));
                }
                if lower.is_none() && upper.is_none() {
                    return Err(Error::QueryTranslation(format!("range on '{}' has no bounds", self.key)));
                }
                Ok(IndexQuery::Range { key, lower: lower.clone(), upper: upper.clone() })
            }
            Comparison::Exists => Ok(IndexQuery::Exists { key }),
        }
    }
}

// ============================================================================
// Groups
// ============================================================================

/// A leaf or a nested group.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchAttribute {
    Predicate(Predicate),
    Group(PredicateGroup),
}

impl SearchAttribute {
    pub fn occur(&self) -> Occur {
        match self {
            SearchAttribute::Predicate(p) => p.occur(),
            SearchAttribute::Group(g) => g.occur(),
        }
    }

    pub fn is_exact_match(&self) -> bool {
        match self {
            SearchAttribute::Predicate(p) => p.is_exact_match(),
            SearchAttribute::Group(g) => g.is_exact_match(),
        }
    }

    pub fn include_in_result(&self, entity: &Entity) -> bool {
        match self {
            SearchAttribute::Predicate(p) => p.include_in_result(entity),
            SearchAttribute::Group(g) => g.include_in_result(entity),
        }
    }

    fn translate(&self, schema: &SchemaRegistry, scope: Option<&str>) -> Result<IndexQuery> {
        match self {
            SearchAttribute::Predicate(p) => p.to_index_query(schema, scope),
            SearchAttribute::Group(g) => g.translate(schema, scope),
        }
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        match self {
            SearchAttribute::Predicate(p) => {
                if !keys.contains(&p.key()) {
                    keys.push(p.key());
                }
            }
            SearchAttribute::Group(g) => g.children.iter().for_each(|c| c.collect_keys(keys)),
        }
    }
}

impl From<Predicate> for SearchAttribute {
    fn from(p: Predicate) -> Self { SearchAttribute::Predicate(p) }
}

impl From<PredicateGroup> for SearchAttribute {
    fn from(g: PredicateGroup) -> Self { SearchAttribute::Group(g) }
}

/// Ordered children combined by boolean policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateGroup {
    occur: Occur,
    children: Vec<SearchAttribute>,
}

impl Default for PredicateGroup {
    fn default() -> Self {
        Self::new(Occur::Must)
    }
}

impl PredicateGroup {
    pub fn new(occur: Occur) -> Self {
        Self { occur, children: Vec::new() }
    }

    pub fn occur(&self) -> Occur {
        self.occur
    }

    pub fn children(&self) -> &[SearchAttribute] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Append a child. Nesting depth is unrestricted.
    pub fn add(&mut self, attr: impl Into<SearchAttribute>) -> &mut Self {
        self.children.push(attr.into());
        self
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, attr: impl Into<SearchAttribute>) -> Self {
        self.add(attr);
        self
    }

    /// AND over children; vacuously true when empty.
    pub fn is_exact_match(&self) -> bool {
        self.children.iter().all(SearchAttribute::is_exact_match)
    }

    /// Exact in-memory evaluation, independent of the index.
    pub fn include_in_result(&self, entity: &Entity) -> bool {
        let mut has_should = false;
        let mut should_matched = false;

        for child in &self.children {
            match child.occur() {
                Occur::Must => {
                    if !child.include_in_result(entity) {
                        return false;
                    }
                }
                Occur::MustNot => {
                    if child.include_in_result(entity) {
                        return false;
                    }
                }
                Occur::Should => {
                    has_should = true;
                    if !should_matched {
                        should_matched = child.include_in_result(entity);
                    }
                }
            }
        }

        !has_should || should_matched
    }

    /// The type this tree is restricted to: a type equality reachable
    /// through `Must` children.
    pub fn type_name(&self) -> Option<&str> {
        self.children.iter()
            .filter(|c| c.occur() == Occur::Must)
            .find_map(|c| match c {
                SearchAttribute::Predicate(p) => p.type_name(),
                SearchAttribute::Group(g) => g.type_name(),
            })
    }

    /// Every property key referenced anywhere in the tree, first use first.
    pub fn referenced_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.children.iter().for_each(|c| c.collect_keys(&mut keys));
        keys
    }

    /// Translate into the native index form.
    pub fn to_index_query(&self, schema: &SchemaRegistry) -> Result<IndexQuery> {
        self.translate(schema, self.type_name())
    }

    fn translate(&self, schema: &SchemaRegistry, scope: Option<&str>) -> Result<IndexQuery> {
        let clauses = self.children
            .iter()
            .map(|child| Ok((child.occur(), child.translate(schema, scope)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(IndexQuery::Boolean(clauses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeId};
    use crate::schema::PropertyKey;

    fn person(name: &str, age: i64) -> Entity {
        Entity::Node(
            Node::new(NodeId(1))
                .with_labels(["Person"])
                .with_property("type", "Person")
                .with_property("name", name)
                .with_property("age", age),
        )
    }

    fn schema() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register("Person", [
                PropertyKey::new("name", ValueType::String),
                PropertyKey::new("age", ValueType::Int),
                PropertyKey::new("active", ValueType::Bool),
            ])
            .build()
    }

    #[test]
    fn test_empty_group_is_exact_and_matches() {
        let group = PredicateGroup::new(Occur::Must);
        assert!(group.is_exact_match());
        assert!(group.include_in_result(&person("Ada", 36)));
    }

    #[test]
    fn test_exactness_is_and_of_children() {
        let exact = PredicateGroup::default()
            .with(Predicate::of_type(Occur::Must, "Person"))
            .with(Predicate::equals(Occur::Must, "name", "Ada"));
        assert!(exact.is_exact_match());

        let nested = exact.clone().with(
            PredicateGroup::new(Occur::Should)
                .with(Predicate::new(Occur::Must, "name", Comparison::Contains("ad".into()))),
        );
        assert!(!nested.is_exact_match());
    }

    #[test]
    fn test_must_and_must_not() {
        let group = PredicateGroup::default()
            .with(Predicate::of_type(Occur::Must, "Person"))
            .with(Predicate::equals(Occur::MustNot, "name", "Grace"));
        assert!(group.include_in_result(&person("Ada", 36)));
        assert!(!group.include_in_result(&person("Grace", 40)));
    }

    #[test]
    fn test_should_does_not_override_later_must_not() {
        let group = PredicateGroup::default()
            .with(Predicate::equals(Occur::Should, "name", "Ada"))
            .with(Predicate::equals(Occur::Should, "name", "Grace"))
            .with(Predicate::equals(Occur::MustNot, "age", 36));
        assert!(!group.include_in_result(&person("Ada", 36)));
        assert!(group.include_in_result(&person("Grace", 40)));
        assert!(!group.include_in_result(&person("Linus", 50)));
    }

    #[test]
    fn test_contains_and_between_are_exact_in_memory() {
        let contains = Predicate::new(Occur::Must, "name", Comparison::Contains("LOVE".into()));
        assert!(contains.include_in_result(&person("Ada Lovelace", 36)));
        // the index folds punctuation away and would admit this one
        let folded = Predicate::new(Occur::Must, "name", Comparison::Contains("alove".into()));
        assert!(!folded.include_in_result(&person("Ada-Lovelace", 36)));

        let between = Predicate::new(
            Occur::Must,
            "age",
            Comparison::Between { lower: Some(Value::Int(30)), upper: Some(Value::Int(40)) },
        );
        assert!(between.include_in_result(&person("Ada", 30)));
        assert!(!between.include_in_result(&person("Grace", 40)));
        assert!(!between.is_exact_match());
    }

    #[test]
    fn test_equals_null_matches_missing() {
        let p = Predicate::equals(Occur::Must, "nickname", Value::Null);
        assert!(p.include_in_result(&person("Ada", 36)));
    }

    #[test]
    fn test_translation() {
        let group = PredicateGroup::default()
            .with(Predicate::of_type(Occur::Must, "Person"))
            .with(
                PredicateGroup::new(Occur::Should)
                    .with(Predicate::equals(Occur::Should, "name", "Ada")),
            )
            .with(Predicate::equals(Occur::MustNot, "age", 36));

        let q = group.to_index_query(&schema()).unwrap();
        assert_eq!(
            q,
            IndexQuery::Boolean(vec![
                (Occur::Must, IndexQuery::Type("Person".into())),
                (Occur::Should, IndexQuery::Boolean(vec![
                    (Occur::Should, IndexQuery::Term { key: "name".into(), value: Value::from("Ada") }),
                ])),
                (Occur::MustNot, IndexQuery::Term { key: "age".into(), value: Value::Int(36) }),
            ])
        );
        assert!(q.has_type_clause());
    }

    #[test]
    fn test_translation_errors() {
        let schema = schema();
        let unknown = PredicateGroup::default().with(Predicate::equals(Occur::Must, "salary", 1));
        assert!(matches!(unknown.to_index_query(&schema), Err(Error::QueryTranslation(_))));

        let text_on_int = PredicateGroup::default()
            .with(Predicate::new(Occur::Must, "age", Comparison::Contains("3".into())));
        assert!(matches!(text_on_int.to_index_query(&schema), Err(Error::QueryTranslation(_))));

        let range_on_bool = PredicateGroup::default().with(Predicate::new(
            Occur::Must,
            "active",
            Comparison::Between { lower: Some(Value::Bool(false)), upper: None },
        ));
        assert!(matches!(range_on_bool.to_index_query(&schema), Err(Error::QueryTranslation(_))));
    }

    #[test]
    fn test_referenced_keys_and_type() {
        let group = PredicateGroup::default()
            .with(PredicateGroup::new(Occur::Must).with(Predicate::of_type(Occur::Must, "Person")))
            .with(Predicate::equals(Occur::Should, "name", "Ada"))
            .with(Predicate::equals(Occur::Should, "name", "Grace"));
        assert_eq!(group.type_name(), Some("Person"));
        assert_eq!(group.referenced_keys(), vec!["type", "name"]);
    }
}
