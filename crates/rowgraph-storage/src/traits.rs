//! The [`RowStore`] trait defining the backing store contract.
//!
//! The commit engine needs four things from a relational store:
//! - atomic execution of a batch of writes, through [`RowTransaction`];
//! - fetching a row by primary key;
//! - the table metadata, as a [`Schema`];
//! - a table-level [`ChangeBus`] to publish events to.
//!
//! All backends (InMemoryStore, SqliteStore) implement this trait, so the
//! commit engine never depends on a concrete store.

use std::sync::Arc;

use indexmap::IndexMap;
use rowgraph_core::{RowId, Schema, Value};

use crate::error::StorageError;
use crate::events::ChangeBus;
use crate::types::Row;

/// A relational store rows are committed to.
///
/// The trait is synchronous: a commit blocks only on the store's own I/O.
pub trait RowStore {
    /// An open unit of work borrowing the store.
    type Tx<'a>: RowTransaction
    where
        Self: 'a;

    /// Tables, keys and foreign keys of this store.
    fn schema(&self) -> &Arc<Schema>;

    /// Begins a unit of work. Writes are visible to nothing else until the
    /// transaction commits.
    fn transaction(&mut self) -> Result<Self::Tx<'_>, StorageError>;

    /// Reads one committed row.
    fn fetch(&self, table: &str, id: RowId) -> Result<Option<Row>, StorageError>;

    fn bus(&self) -> &ChangeBus;

    fn bus_mut(&mut self) -> &mut ChangeBus;
}

/// Writes of one unit of work.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls
/// every write back.
pub trait RowTransaction {
    /// Inserts a row and returns it as stored.
    ///
    /// Values of `auto_fields` are ignored and generated by the store: the
    /// next primary key, or the next order value. An order field that is
    /// absent or null is generated as well.
    fn insert(
        &mut self,
        table: &str,
        values: &IndexMap<String, Value>,
        auto_fields: &[String],
    ) -> Result<Row, StorageError>;

    /// Overwrites the given fields of an existing row and returns the whole
    /// row as stored.
    fn update(
        &mut self,
        table: &str,
        id: RowId,
        values: &IndexMap<String, Value>,
    ) -> Result<Row, StorageError>;

    /// Deletes a row no other row refers to, returning its last values.
    fn delete(&mut self, table: &str, id: RowId) -> Result<Row, StorageError>;

    /// Makes every write of this transaction durable and visible.
    fn commit(self) -> Result<(), StorageError>;
}
