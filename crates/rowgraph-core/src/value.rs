//! Field values carried by row-value nodes.
//!
//! A field of a node holds either a [`Value`] (a scalar as the store sees it)
//! or a link to another node of the arena. Link-free copies of a node, as the
//! commit engine writes them, only ever contain scalars.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{NodeId, RowId};
use crate::schema::FieldType;

/// A scalar field value.
///
/// Equality is exact, including for reals: cached identifiers and values are
/// compared against freshly fetched ones without any tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Interprets this value as a row identifier.
    pub fn as_row_id(&self) -> Option<RowId> {
        self.as_integer().map(RowId)
    }

    /// The schema type this value inhabits, `None` for null.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Real(_) => Some(FieldType::Real),
            Value::Text(_) => Some(FieldType::Text),
            Value::Boolean(_) => Some(FieldType::Boolean),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<RowId> for Value {
    fn from(v: RowId) -> Self {
        Value::Integer(v.0)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// The content of one field of a row-value node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A plain value, including a foreign key given as a raw row id.
    Scalar(Value),
    /// A foreign key pointing at another node of the arena.
    Link(NodeId),
}

impl FieldValue {
    /// Returns the scalar, if this is not a link.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(v) => Some(v),
            FieldValue::Link(_) => None,
        }
    }

    /// Returns the link target, if this is a link.
    pub fn as_link(&self) -> Option<NodeId> {
        match self {
            FieldValue::Scalar(_) => None,
            FieldValue::Link(n) => Some(*n),
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, FieldValue::Link(_))
    }
}
