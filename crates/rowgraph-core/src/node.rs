//! Row-value nodes.
//!
//! A [`RowValues`] is an in-memory, possibly incomplete representation of one
//! relational row: its table, an insertion-ordered map of field values (some
//! of which may be links to other nodes), and the cluster currently owning it.
//! Nodes are only ever mutated through [`RowGraph`](crate::graph::RowGraph),
//! which keeps links, referents and cluster membership consistent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::{ClusterId, NodeId, RowId};
use crate::value::{FieldValue, Value};

/// One node of the row-value graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowValues {
    pub(crate) table: String,
    pub(crate) primary_key: String,
    pub(crate) values: IndexMap<String, FieldValue>,
    pub(crate) cluster: ClusterId,
}

impl RowValues {
    pub(crate) fn new(table: &str, primary_key: &str, cluster: ClusterId) -> Self {
        RowValues {
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            values: IndexMap::new(),
            cluster,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    /// All field values, links included, in insertion order.
    pub fn values(&self) -> &IndexMap<String, FieldValue> {
        &self.values
    }

    /// Names of the fields present on this node, in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Returns `true` if every field of `other` is present on this node.
    pub fn has_fields_of(&self, other: &RowValues) -> bool {
        other.fields().all(|f| self.contains_field(f))
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// The scalar value of `field`, `None` if absent or a link.
    pub fn scalar(&self, field: &str) -> Option<&Value> {
        self.values.get(field).and_then(FieldValue::as_scalar)
    }

    /// The node `field` links to, `None` if absent or a scalar.
    pub fn foreign(&self, field: &str) -> Option<NodeId> {
        self.values.get(field).and_then(FieldValue::as_link)
    }

    /// Every link of this node as `(field, target)`, in insertion order.
    pub fn foreigns(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_link().map(|n| (k.as_str(), n)))
    }

    /// Scalar fields only, in insertion order.
    pub fn scalars(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_scalar().map(|s| (k.as_str(), s)))
    }

    /// A link-free copy of the scalar fields.
    pub fn no_link_values(&self) -> IndexMap<String, Value> {
        self.scalars()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// The primary key, if present and not null.
    pub fn id(&self) -> Option<RowId> {
        self.scalar(&self.primary_key).and_then(Value::as_row_id)
    }

    pub fn has_id(&self) -> bool {
        self.id().is_some()
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Compares this node alone with `other`: same table, same scalar
    /// values and same set of link fields. Link targets are not followed.
    pub fn equals_just_this(&self, other: &RowValues) -> bool {
        if self.table != other.table || self.values.len() != other.values.len() {
            return false;
        }
        self.values.iter().all(|(k, v)| match (v, other.values.get(k)) {
            (FieldValue::Scalar(a), Some(FieldValue::Scalar(b))) => a == b,
            (FieldValue::Link(_), Some(FieldValue::Link(_))) => true,
            _ => false,
        })
    }
}
