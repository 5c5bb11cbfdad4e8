//! # Schema Registry
//!
//! Explicit mapping from type name to the ordered property keys of that type.
//! Populated once at startup through [`SchemaRegistryBuilder`] and immutable
//! afterwards; lookups are by name.
//!
//! A [`PropertyKey`] carries its declared [`ValueType`], an optional
//! converter (raw input → stored value) and any number of validators
//! (stored value → ok | diagnostic).

pub mod convert;
pub mod validate;

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, Value, TYPE_KEY, UUID_KEY};
use crate::{Error, Result};

pub use convert::{PropertyConverter, IntConverter, BoolConverter, DateTimeConverter};
pub use validate::{PropertyValidator, EnumValidator, NotBlankValidator};

// ============================================================================
// Value types
// ============================================================================

/// Declared storage type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    DateTime,
    List,
    /// No declared type; any value is accepted.
    Any,
}

impl ValueType {
    /// Whether a stored value is of this type. NULL matches every type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ValueType::Any, _)
                | (ValueType::Bool, Value::Bool(_))
                | (ValueType::Int, Value::Int(_))
                | (ValueType::Float, Value::Float(_) | Value::Int(_))
                | (ValueType::String, Value::String(_))
                | (ValueType::DateTime, Value::DateTime(_) | Value::Date(_))
                | (ValueType::List, Value::List(_))
        )
    }

    /// Whether values of this type have a text form worth substring matching.
    pub fn is_textual(&self) -> bool {
        matches!(self, ValueType::String | ValueType::Any)
    }

    /// Whether values of this type are ordered.
    pub fn is_ordered(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float | ValueType::String | ValueType::DateTime | ValueType::Any)
    }
}

// ============================================================================
// PropertyKey
// ============================================================================

/// Typed, named attribute slot on an entity type.
#[derive(Clone)]
pub struct PropertyKey {
    name: String,
    value_type: ValueType,
    converter: Option<Arc<dyn PropertyConverter>>,
    validators: Vec<Arc<dyn PropertyValidator>>,
}

impl PropertyKey {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            converter: None,
            validators: Vec::new(),
        }
    }

    pub fn with_converter(mut self, converter: impl PropertyConverter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn with_validator(mut self, validator: impl PropertyValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Run the converter, if any. Values already of the declared type pass
    /// through untouched.
    pub fn convert(&self, raw: Value) -> Result<Value> {
        match &self.converter {
            Some(converter) if !self.value_type.accepts(&raw) => converter.convert(&self.name, &raw),
            _ => Ok(raw),
        }
    }

    /// Check the declared type, then run every validator in order.
    pub fn validate(&self, type_name: &str, value: &Value) -> Result<()> {
        if !self.value_type.accepts(value) {
            return Err(Error::Validation {
                type_name: type_name.to_string(),
                key: self.name.clone(),
                message: format!("expected {:?}, got {}", self.value_type, value.type_name()),
                allowed: Vec::new(),
            });
        }
        for validator in &self.validators {
            validator.validate(type_name, &self.name, value)?;
        }
        Ok(())
    }

    /// Convert then validate.
    pub fn accept(&self, type_name: &str, raw: Value) -> Result<Value> {
        let value = self.convert(raw)?;
        self.validate(type_name, &value)?;
        Ok(value)
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyKey")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("converter", &self.converter.is_some())
            .field("validators", &self.validators.len())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Whether a key is managed by the core on every entity.
pub fn is_system_key(key: &str) -> bool {
    key == TYPE_KEY || key == UUID_KEY
}

/// Immutable type-name → property-key lookup.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, Vec<PropertyKey>>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn contains_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Declared keys of a type, in registration order.
    pub fn keys(&self, type_name: &str) -> Option<&[PropertyKey]> {
        self.types.get(type_name).map(Vec::as_slice)
    }

    pub fn key(&self, type_name: &str, key: &str) -> Option<&PropertyKey> {
        self.types.get(type_name)?.iter().find(|k| k.name == key)
    }

    /// Any declaration of `key` across all types.
    pub fn find_key(&self, key: &str) -> Option<&PropertyKey> {
        self.types.values().flat_map(|keys| keys.iter()).find(|k| k.name == key)
    }

    /// Whether `key` is a system key or declared on some type.
    pub fn knows_key(&self, key: &str) -> bool {
        is_system_key(key) || self.find_key(key).is_some()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Convert and validate raw attributes for a new entity of `type_name`.
    ///
    /// Declared keys go through their converter and validators; undeclared
    /// keys are stored as given.
    pub fn prepare(&self, type_name: &str, attributes: PropertyMap) -> Result<PropertyMap> {
        let keys = self.types.get(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))?;

        let mut prepared = PropertyMap::with_capacity(attributes.len() + 2);
        for (name, raw) in attributes {
            let value = match keys.iter().find(|k| k.name == name) {
                Some(key) => key.accept(type_name, raw)?,
                None => raw,
            };
            prepared.insert(name, value);
        }
        Ok(prepared)
    }
}

/// Builder for [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    types: HashMap<String, Vec<PropertyKey>>,
}

impl SchemaRegistryBuilder {
    /// Register a type with its keys. Registering a name twice appends keys;
    /// a key registered twice keeps its first declaration.
    pub fn register(mut self, type_name: impl Into<String>, keys: impl IntoIterator<Item = PropertyKey>) -> Self {
        let entry = self.types.entry(type_name.into()).or_default();
        for key in keys {
            if !entry.iter().any(|k| k.name == key.name) {
                entry.push(key);
            }
        }
        self
    }

    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry { types: self.types }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::props;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register("Person", [
                PropertyKey::new("name", ValueType::String).with_validator(NotBlankValidator),
                PropertyKey::new("age", ValueType::Int).with_converter(IntConverter),
            ])
            .register("Person", [PropertyKey::new("age", ValueType::String)])
            .build()
    }

    #[test]
    fn test_lookup_keeps_registration_order() {
        let schema = registry();
        let names: Vec<&str> = schema.keys("Person").unwrap().iter().map(PropertyKey::name).collect();
        assert_eq!(names, ["name", "age"]);
        assert_eq!(schema.key("Person", "age").unwrap().value_type(), ValueType::Int);
        assert!(schema.knows_key("uuid"));
        assert!(!schema.knows_key("salary"));
    }

    #[test]
    fn test_prepare_converts_declared_keys() {
        let schema = registry();
        let prepared = schema
            .prepare("Person", props([("name", Value::from("Ada")), ("age", Value::from("36")), ("nick", Value::from("A"))]))
            .unwrap();
        assert_eq!(prepared["age"], Value::Int(36));
        assert_eq!(prepared["nick"], Value::from("A"));
    }

    #[test]
    fn test_prepare_rejects_unknown_type_and_bad_values() {
        let schema = registry();
        assert!(matches!(schema.prepare("Robot", PropertyMap::new()), Err(Error::UnknownType(_))));
        assert!(matches!(
            schema.prepare("Person", props([("age", "old")])),
            Err(Error::Conversion { .. })
        ));
        assert!(matches!(
            schema.prepare("Person", props([("name", "  ")])),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            schema.prepare("Person", props([("name", 5)])),
            Err(Error::Validation { .. })
        ));
    }
}
