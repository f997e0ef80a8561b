//! In-memory graphs of relational rows linked through foreign keys.
//!
//! A [`RowGraph`] owns row-value nodes ([`RowValues`]) and keeps them
//! partitioned into [`Cluster`]s, the connected components of the link
//! graph. On top of the arena sit [`Path`]s describing traversals between
//! tables, a generic [walker](RowGraph::walk), and the structural algorithms
//! built with it (containment, pruning, deep equality, tree printing).
//! Persisting a cluster is the job of `rowgraph-storage`.

pub mod cluster;
pub mod error;
pub mod graph;
pub mod id;
pub mod listener;
pub mod node;
pub mod path;
pub mod print;
pub mod schema;
pub mod shared;
pub mod structural;
pub mod value;
pub mod walk;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use cluster::{Cluster, Link};
pub use error::CoreError;
pub use graph::{ForeignLink, RowGraph};
pub use id::{ClusterId, NodeId, RowId};
pub use listener::{ReferentChangeEvent, SharedListener, ValueChangeEvent, ValueChangeListener};
pub use node::RowValues;
pub use path::{Path, Step};
pub use schema::{FieldDef, FieldRef, FieldType, Schema, TableDef};
pub use shared::SharedRowGraph;
pub use value::{FieldValue, Value};
pub use walk::{Direction, FieldPath, RecursionType, StopRecurse, Visit, WalkState};
