//! Dynamic value model shared by evaluation contexts and object flags.
//!
//! [`Value`] is the tagged sum carried by context attributes, hook hints, and
//! object-flavored flag resolutions. Providers return it; the pipeline checks
//! it against the requested [`FlagType`] before handing a typed value back to
//! the caller.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The type a caller requested for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlagType {
    /// Boolean flag.
    Bool,
    /// String flag.
    String,
    /// 64-bit integer flag.
    Int,
    /// 64-bit float flag.
    Float,
    /// Dynamic (object) flag; any [`Value`] passes through unchecked.
    Object,
}

impl std::fmt::Display for FlagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A dynamically typed value.
///
/// Serializes untagged, so a `Struct` becomes a plain JSON object and a
/// `Timestamp` an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Ordered sequence of values.
    List(Vec<Value>),
    /// String-keyed nested structure.
    Struct(HashMap<String, Value>),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
            Self::Struct(_) => "struct",
        }
    }

    /// Returns `true` when the value is assignable to `flag_type`.
    ///
    /// `Object` accepts everything; the scalar types accept exactly their own
    /// variant (`Int` does not coerce to `Float` or vice versa).
    #[must_use]
    pub fn conforms_to(&self, flag_type: FlagType) -> bool {
        match flag_type {
            FlagType::Bool => matches!(self, Self::Bool(_)),
            FlagType::String => matches!(self, Self::String(_)),
            FlagType::Int => matches!(self, Self::Int(_)),
            FlagType::Float => matches!(self, Self::Float(_)),
            FlagType::Object => true,
        }
    }

    /// Boolean payload, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload, if this is a `Float`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String slice, if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamp payload, if this is a `Timestamp`.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// List payload, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Struct payload, if this is a `Struct`.
    #[must_use]
    pub fn as_struct(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Self::Struct(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_their_variant_only() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(7).as_bool(), None);
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from("x").as_int(), None);
    }

    #[test]
    fn ints_and_floats_do_not_cross_assign() {
        assert!(Value::Int(1).conforms_to(FlagType::Int));
        assert!(!Value::Int(1).conforms_to(FlagType::Float));
        assert!(!Value::Float(1.0).conforms_to(FlagType::Int));
    }

    #[test]
    fn object_accepts_any_variant() {
        for v in [
            Value::Bool(true),
            Value::Int(1),
            Value::Float(1.0),
            Value::from("s"),
            Value::List(vec![]),
            Value::Struct(HashMap::new()),
        ] {
            assert!(v.conforms_to(FlagType::Object), "{} must conform", v.kind());
        }
    }

    #[test]
    fn struct_serializes_as_plain_object() {
        let v = Value::Struct(HashMap::from([("a".to_string(), Value::Int(1))]));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({ "a": 1 }));
    }
}
