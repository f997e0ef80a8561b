//! Core error types for rowgraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! all anticipated failure modes of the row-value graph: schema lookups,
//! path construction, cluster membership and structural mismatches.

use crate::id::NodeId;
use thiserror::Error;

/// Core errors produced by the rowgraph-core crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A table name is not part of the schema.
    #[error("unknown table: '{table}'")]
    UnknownTable { table: String },

    /// A field name is not part of its table.
    #[error("unknown field: '{table}.{field}'")]
    UnknownField { table: String, field: String },

    /// A node handle does not exist in the arena.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A node was used with a cluster it does not belong to.
    #[error("node {node} is not a member of the expected cluster")]
    NotInCluster { node: NodeId },

    /// Two graphs that must be rooted in the same table are not.
    #[error("table mismatch: '{expected}' vs '{found}'")]
    TableMismatch { expected: String, found: String },

    /// A field used as a link is not a foreign key, or does not touch the
    /// current end of a path.
    #[error("invalid step from '{from}' through '{field}': {reason}")]
    InvalidStep {
        from: String,
        field: String,
        reason: String,
    },

    /// A step cannot be resolved to a single direction or field.
    #[error("ambiguous step from '{from}' to '{to}': {reason}")]
    AmbiguousStep {
        from: String,
        to: String,
        reason: String,
    },

    /// A step or path was appended where it does not begin.
    #[error("broken path: path ends at '{path_end}' but step begins at '{step_start}'")]
    BrokenPath {
        path_end: String,
        step_start: String,
    },

    /// A path index is outside of the path.
    #[error("path index {index} out of range for length {length}")]
    PathIndex { index: isize, length: usize },

    /// A sub-path would end before it starts.
    #[error("path range {from}..{to} is reversed")]
    PathRange { from: usize, to: usize },

    /// A link targets a node of the wrong table.
    #[error("link '{table}.{field}' must point to '{expected}', not '{found}'")]
    LinkTarget {
        table: String,
        field: String,
        expected: String,
        found: String,
    },

    /// Field values failed their schema checks.
    #[error("invalid values for '{table}': {reason}")]
    Validation { table: String, reason: String },

    /// A structural algorithm found the first violating path.
    #[error("structural mismatch: {reason}")]
    StructuralMismatch { reason: String },

    /// An internal graph invariant was violated.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
