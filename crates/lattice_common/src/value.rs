//! Property values and their declared types.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Calendar date without a time component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Date {
    pub year: i16,
    pub month: u8,
    pub day: u8,
}

/// A property value as carried in requests and rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(Date),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    List(Vec<Value>),
}

/// Runtime kind of a value, used by index-key decoders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Date,
    DateTime,
    List,
}

/// Declared column type in a schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    Bool,
    Int,
    Float,
    String,
    /// Fixed-capacity string; longer inputs are rejected.
    FixedString(u16),
    Date,
    DateTime,
    List,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Date(_) => ValueKind::Date,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be stored in a column of the given type.
    /// Null is handled by the caller via the column's nullability.
    pub fn matches(&self, ty: &PropertyType) -> bool {
        matches!(
            (self, ty),
            (Value::Bool(_), PropertyType::Bool)
                | (Value::Int(_), PropertyType::Int)
                | (Value::Float(_), PropertyType::Float)
                | (Value::Str(_), PropertyType::String)
                | (Value::Str(_), PropertyType::FixedString(_))
                | (Value::Date(_), PropertyType::Date)
                | (Value::DateTime(_), PropertyType::DateTime)
                | (Value::List(_), PropertyType::List)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Ordered comparison within a type. Cross-type comparisons and
    /// comparisons against Null are undefined and return `None`.
    pub fn partial_cmp_same_kind(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl PropertyType {
    /// The runtime kind values of this type decode to. Index-key layout only
    /// distinguishes string columns from fixed-width ones.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            PropertyType::Bool => ValueKind::Bool,
            PropertyType::Int => ValueKind::Int,
            PropertyType::Float => ValueKind::Float,
            PropertyType::String | PropertyType::FixedString(_) => ValueKind::Str,
            PropertyType::Date => ValueKind::Date,
            PropertyType::DateTime => ValueKind::DateTime,
            PropertyType::List => ValueKind::List,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Date(d) => write!(f, "{:04}-{:02}-{:02}", d.year, d.month, d.day),
            Value::DateTime(ms) => write!(f, "datetime({ms})"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_checks_type_not_content() {
        assert!(Value::Int(7).matches(&PropertyType::Int));
        assert!(Value::Str("x".into()).matches(&PropertyType::FixedString(8)));
        assert!(!Value::Int(7).matches(&PropertyType::Float));
        assert!(!Value::Null.matches(&PropertyType::Int));
    }

    #[test]
    fn same_kind_ordering() {
        assert_eq!(
            Value::Int(1).partial_cmp_same_kind(&Value::Int(2)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int(1).partial_cmp_same_kind(&Value::Str("a".into())), None);
        assert_eq!(Value::Null.partial_cmp_same_kind(&Value::Null), None);
    }
}
