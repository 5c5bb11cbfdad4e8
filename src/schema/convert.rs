//! Input converters: raw external values → stored values.

use chrono::{DateTime, NaiveDate, Utc};

use crate::model::Value;
use crate::{Error, Result};

/// Turns a raw input value into the value stored under a key.
pub trait PropertyConverter: Send + Sync {
    fn convert(&self, key: &str, raw: &Value) -> Result<Value>;
}

fn conversion_error(key: &str, raw: &Value, target: &str) -> Error {
    Error::Conversion {
        key: key.to_string(),
        message: format!("cannot convert {} {raw} to {target}", raw.type_name()),
    }
}

/// Strings and integral floats to `Int`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntConverter;

impl PropertyConverter for IntConverter {
    fn convert(&self, key: &str, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null | Value::Int(_) => Ok(raw.clone()),
            // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
            Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Ok(Value::Int(*f as i64))
            }
            Value::String(s) => s.trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| conversion_error(key, raw, "INTEGER")),
            _ => Err(conversion_error(key, raw, "INTEGER")),
        }
    }
}

/// `"true"`/`"false"` (any case), `"1"`/`"0"` and integers to `Bool`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolConverter;

impl PropertyConverter for BoolConverter {
    fn convert(&self, key: &str, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null | Value::Bool(_) => Ok(raw.clone()),
            Value::Int(0) => Ok(Value::Bool(false)),
            Value::Int(1) => Ok(Value::Bool(true)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(conversion_error(key, raw, "BOOLEAN")),
            },
            _ => Err(conversion_error(key, raw, "BOOLEAN")),
        }
    }
}

/// RFC 3339 timestamps and `YYYY-MM-DD` dates to `DateTime` (UTC).
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeConverter;

impl PropertyConverter for DateTimeConverter {
    fn convert(&self, key: &str, raw: &Value) -> Result<Value> {
        match raw {
            Value::Null | Value::DateTime(_) => Ok(raw.clone()),
            Value::Date(d) => d.and_hms_opt(0, 0, 0)
                .map(|dt| Value::DateTime(dt.and_utc()))
                .ok_or_else(|| conversion_error(key, raw, "DATETIME")),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Ok(Value::DateTime(dt.with_timezone(&Utc)));
                }
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| Value::DateTime(dt.and_utc()))
                    .ok_or_else(|| conversion_error(key, raw, "DATETIME"))
            }
            _ => Err(conversion_error(key, raw, "DATETIME")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_int_converter() {
        assert_eq!(IntConverter.convert("n", &Value::from(" 42 ")).unwrap(), Value::Int(42));
        assert_eq!(IntConverter.convert("n", &Value::Float(3.0)).unwrap(), Value::Int(3));
        assert!(matches!(IntConverter.convert("n", &Value::Float(3.5)), Err(Error::Conversion { .. })));
    }

    #[test]
    fn test_int_converter_rejects_out_of_range_floats() {
        for f in [1e300, -1e300, 9.223372036854775808e18, f64::INFINITY, f64::NAN] {
            assert!(
                matches!(IntConverter.convert("n", &Value::Float(f)), Err(Error::Conversion { ref key, .. }) if key == "n"),
                "{f} converted"
            );
        }
        assert_eq!(IntConverter.convert("n", &Value::Float(-9.223372036854775808e18)).unwrap(), Value::Int(i64::MIN));
    }

    #[test]
    fn test_bool_converter() {
        assert_eq!(BoolConverter.convert("b", &Value::from("TRUE")).unwrap(), Value::Bool(true));
        assert_eq!(BoolConverter.convert("b", &Value::Int(0)).unwrap(), Value::Bool(false));
        assert!(BoolConverter.convert("b", &Value::from("maybe")).is_err());
    }

    #[test]
    fn test_datetime_converter() {
        let expected = Value::DateTime(Utc.with_ymd_and_hms(2013, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(DateTimeConverter.convert("d", &Value::from("2013-05-01")).unwrap(), expected);
        assert_eq!(DateTimeConverter.convert("d", &Value::from("2013-05-01T02:00:00+02:00")).unwrap(), expected);
        assert!(DateTimeConverter.convert("d", &Value::from("May 1st")).is_err());
    }
}
