//! Atomic persistence of row-value graphs.
//!
//! Provides the [`RowStore`] trait defining the contract a relational store
//! offers the commit engine, the [`InMemoryStore`] and [`SqliteStore`]
//! backends, and the algorithms that need a store:
//!
//! - [`commit::store`] writes a whole cluster in one transaction, in foreign
//!   key order, breaking cycles with a follow-up update;
//! - [`grow::grow`] completes a graph with rows fetched by id.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all store failure modes
//! - [`types`]: Row, StoreMode, TableEvent
//! - [`traits`]: RowStore and RowTransaction
//! - [`events`]: the table-level change bus
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: SQLite configuration and table creation
//! - [`sqlite`]: SqliteStore implementation
//! - [`commit`]: the commit engine
//! - [`grow`]: growing a graph from the store

pub mod commit;
pub mod error;
pub mod events;
pub mod grow;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use commit::{delete, store, CommitError, CommitOutcome};
pub use error::StorageError;
pub use events::{ChangeBus, TableListener};
pub use grow::grow;
pub use memory::{InMemoryStore, Trigger};
pub use schema::SqliteConfig;
pub use sqlite::SqliteStore;
pub use traits::{RowStore, RowTransaction};
pub use types::{ModificationKind, Row, StoreMode, TableEvent};
