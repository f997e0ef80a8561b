//! Storage-layer types: persisted rows, commit modes and change events.
//!
//! A [`Row`] only exists once the store has accepted a write, which is why
//! it lives here rather than in rowgraph-core: nodes become rows when
//! persisted.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use rowgraph_core::{NodeId, RowId, TableDef, Value};

/// A row as the store holds it, every column present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub table: String,
    pub id: RowId,
    /// Column values in declaration order.
    pub values: IndexMap<String, Value>,
}

impl Row {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.id)
    }
}

/// How the first write of each node is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    /// Always insert. Unless the flags say otherwise the store generates
    /// the primary key and the order value, ignoring the node's own.
    Insert { insert_pk: bool, insert_order: bool },
    /// Update nodes that have a primary key, insert the others.
    Commit,
}

impl StoreMode {
    /// Insert letting the store generate keys and order.
    pub fn insert() -> Self {
        StoreMode::Insert {
            insert_pk: false,
            insert_order: false,
        }
    }

    /// Fields of `table` whose inserted values the store generates.
    pub fn auto_fields(&self, table: &TableDef) -> Vec<String> {
        let (insert_pk, insert_order) = match *self {
            StoreMode::Insert {
                insert_pk,
                insert_order,
            } => (insert_pk, insert_order),
            StoreMode::Commit => (false, true),
        };
        let mut auto = Vec::new();
        if !insert_pk {
            auto.push(table.primary_key.clone());
        }
        if let (false, Some(order)) = (insert_order, &table.order_field) {
            auto.push(order.clone());
        }
        auto
    }
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::Commit
    }
}

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModificationKind {
    RowAdded,
    RowUpdated,
    RowDeleted,
}

impl fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModificationKind::RowAdded => "added",
            ModificationKind::RowUpdated => "updated",
            ModificationKind::RowDeleted => "deleted",
        };
        f.write_str(s)
    }
}

/// One write, as published to the listeners of its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEvent {
    pub table: String,
    pub id: RowId,
    pub kind: ModificationKind,
    /// Names of the fields the write carried.
    pub fields: Vec<String>,
    /// The row as stored after the write.
    pub row: Row,
    /// Node of the fully resolved copy of the committed graph standing for
    /// this row; `None` for deletions.
    pub values: Option<NodeId>,
}

impl TableEvent {
    pub fn is_addition(&self) -> bool {
        self.kind == ModificationKind::RowAdded
    }
}
