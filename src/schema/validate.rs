//! Property validators: stored value → ok | diagnostic.

use crate::model::Value;
use crate::{Error, Result};

/// Checks a converted value before it is stored.
pub trait PropertyValidator: Send + Sync {
    fn validate(&self, type_name: &str, key: &str, value: &Value) -> Result<()>;
}

/// Value must be one of a fixed set. The diagnostic lists the allowed values.
#[derive(Debug, Clone)]
pub struct EnumValidator {
    values: Vec<Value>,
}

impl EnumValidator {
    pub fn new(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        let mut unique: Vec<Value> = Vec::new();
        for v in values.into_iter().map(Into::into) {
            if !unique.contains(&v) {
                unique.push(v);
            }
        }
        Self { values: unique }
    }

    pub fn allowed(&self) -> &[Value] {
        &self.values
    }
}

impl PropertyValidator for EnumValidator {
    fn validate(&self, type_name: &str, key: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            return Err(Error::Validation {
                type_name: type_name.to_string(),
                key: key.to_string(),
                message: "must not be empty".into(),
                allowed: self.values.clone(),
            });
        }
        if self.values.contains(value) {
            return Ok(());
        }
        let listed: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        Err(Error::Validation {
            type_name: type_name.to_string(),
            key: key.to_string(),
            message: format!("{value} is not one of [{}]", listed.join(", ")),
            allowed: self.values.clone(),
        })
    }
}

/// Strings must contain something other than whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotBlankValidator;

impl PropertyValidator for NotBlankValidator {
    fn validate(&self, type_name: &str, key: &str, value: &Value) -> Result<()> {
        let blank = match value {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        };
        if blank {
            return Err(Error::Validation {
                type_name: type_name.to_string(),
                key: key.to_string(),
                message: "must not be blank".into(),
                allowed: Vec::new(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_validator_lists_allowed_values() {
        let v = EnumValidator::new(["open", "closed", "open"]);
        assert!(v.validate("Ticket", "state", &Value::from("open")).is_ok());

        match v.validate("Ticket", "state", &Value::from("lost")) {
            Err(Error::Validation { key, allowed, message, .. }) => {
                assert_eq!(key, "state");
                assert_eq!(allowed, vec![Value::from("open"), Value::from("closed")]);
                assert!(message.contains("\"closed\""));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_enum_validator_rejects_null() {
        let v = EnumValidator::new([1, 2]);
        assert!(matches!(v.validate("T", "k", &Value::Null), Err(Error::Validation { .. })));
    }
}
