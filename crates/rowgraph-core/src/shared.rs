//! Thread-safe handle on a [`RowGraph`].
//!
//! Merges and splits move nodes between clusters, so any structural change
//! may touch several clusters at once. The handle serializes every mutation,
//! commits included, behind one writer lock per arena; walks and other
//! read-only algorithms share the reader side and never observe a cluster
//! halfway through a migration.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::graph::RowGraph;
use crate::schema::Schema;

#[derive(Debug, Clone)]
pub struct SharedRowGraph {
    inner: Arc<RwLock<RowGraph>>,
}

impl SharedRowGraph {
    pub fn new(graph: RowGraph) -> Self {
        SharedRowGraph {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    pub fn with_schema(schema: Arc<Schema>) -> Self {
        Self::new(RowGraph::new(schema))
    }

    /// Blocks until no writer holds the graph.
    pub fn read(&self) -> RwLockReadGuard<'_, RowGraph> {
        self.inner.read()
    }

    /// Blocks until the graph is exclusively held.
    pub fn write(&self) -> RwLockWriteGuard<'_, RowGraph> {
        self.inner.write()
    }

    /// Runs `f` under the reader lock.
    pub fn with_read<R>(&self, f: impl FnOnce(&RowGraph) -> R) -> R {
        f(&self.inner.read())
    }

    /// Runs `f` under the writer lock, e.g. a whole commit.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut RowGraph) -> R) -> R {
        f(&mut self.inner.write())
    }
}

impl From<RowGraph> for SharedRowGraph {
    fn from(graph: RowGraph) -> Self {
        Self::new(graph)
    }
}
