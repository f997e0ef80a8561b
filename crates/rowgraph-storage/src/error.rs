//! Storage error types for rowgraph-storage.
//!
//! [`StorageError`] covers the failures of a single store access: the
//! backend itself, constraint violations the store enforces, and lookups of
//! rows that do not exist. Commit-level failures wrap it, see
//! [`CommitError`](crate::commit::CommitError).

use rowgraph_core::{CoreError, RowId};
use thiserror::Error;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The SQLite backend failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema lookup or graph operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No row has this primary key.
    #[error("row not found: {table}[{id}]")]
    RowNotFound { table: String, id: RowId },

    /// An insert reused an existing primary key.
    #[error("duplicate key: {table}[{id}]")]
    DuplicateKey { table: String, id: RowId },

    /// A foreign key references a missing row, or a deleted row is still
    /// referenced.
    #[error("foreign key violation on {table}.{field}: {reason}")]
    ForeignKey {
        table: String,
        field: String,
        reason: String,
    },

    /// A non-null field was left null.
    #[error("not null violation on {table}.{field}")]
    NotNull { table: String, field: String },

    /// A store-side trigger refused the write.
    #[error("trigger on '{table}' failed: {reason}")]
    Trigger { table: String, reason: String },

    /// A stored value does not fit its column.
    #[error("cannot decode {table}.{field}: {reason}")]
    Decode {
        table: String,
        field: String,
        reason: String,
    },

    /// The store configuration is unusable.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}
