//! Atomic persistence of a whole cluster.
//!
//! [`store`] writes every node of a cluster inside one transaction, in an
//! order that satisfies the foreign keys. The cluster's links are turned into
//! a worklist of pending links; a link can be stored once its destination has
//! a known row id (degenerate links always can). Each round:
//!
//! 1. pops the first storable link whose node has no link left waiting, or
//!    failing that (only inside a cycle) the first storable link at all, and
//!    folds into the same write every other storable link leaving the same
//!    node;
//! 2. inserts the node, or if a cycle forced an earlier write, updates the
//!    fields not written yet;
//! 3. after a node's first write, patches its new id into every link waiting
//!    for it;
//! 4. on the last write of a node, checks that the stored foreign keys are
//!    the ids of the rows written for its neighbours.
//!
//! An acyclic cluster is thus written in dependency order without any
//! update, while a cycle `S -> C -> S` is stored as insert S, insert C,
//! update S.
//! Nothing is published unless the transaction commits: on any failure it is
//! dropped, which rolls every write back, and the graph is left untouched.
//! On success each write becomes a [`TableEvent`] fired on the store's bus,
//! pointing into a fresh, fully resolved copy of the committed cluster.

use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use rowgraph_core::{CoreError, NodeId, RowGraph, RowId, Schema, Value};

use crate::error::StorageError;
use crate::traits::{RowStore, RowTransaction};
use crate::types::{ModificationKind, Row, StoreMode, TableEvent};

/// Why a commit failed. The store holds none of its writes.
#[derive(Debug, Error)]
pub enum CommitError {
    /// A node failed its schema checks; the store was not accessed.
    #[error("validation failed: {0}")]
    Validation(#[source] CoreError),

    /// The store refused a write.
    #[error("store failed: {0}")]
    Store(#[from] StorageError),

    /// A graph lookup failed.
    #[error(transparent)]
    Graph(#[from] CoreError),

    /// The store did not keep the foreign key it was given, e.g. a trigger
    /// rewrote it.
    #[error("{table}[{id}].{field} holds {stored} but the row written for it is {expected}")]
    Integrity {
        table: String,
        id: RowId,
        field: String,
        stored: Value,
        expected: RowId,
    },

    /// The commit loop reached a state it cannot leave.
    #[error("commit invariant violated: {reason}")]
    Invariant { reason: String },
}

impl CommitError {
    fn invariant(reason: impl Into<String>) -> Self {
        CommitError::Invariant {
            reason: reason.into(),
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// One event per write, in write order.
    pub events: Vec<TableEvent>,
    /// Each committed node mapped to its resolved copy.
    ///
    /// The copies form a new cluster of the committed graph and stay there
    /// until removed; callers that keep the graph around should
    /// [`discard`](Self::discard) them once the events are handled.
    pub resolved: IndexMap<NodeId, NodeId>,
}

impl CommitOutcome {
    /// The row last written for `node`.
    pub fn row(&self, node: NodeId) -> Option<&Row> {
        let copy = self.resolved.get(&node)?;
        self.events
            .iter()
            .rev()
            .find(|e| e.values == Some(*copy))
            .map(|e| &e.row)
    }

    pub fn count(&self, kind: ModificationKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// Removes the resolved copy from `graph`, returning the number of nodes
    /// dropped. Events keep their rows but their `values` become dangling.
    pub fn discard(&self, graph: &mut RowGraph) -> Result<usize, CoreError> {
        match self.resolved.values().next() {
            Some(&copy) if graph.contains_node(copy) => graph.discard(copy),
            _ => Ok(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Commit state
// ---------------------------------------------------------------------------

/// A cluster link awaiting its write.
#[derive(Debug, Clone, PartialEq)]
struct PendingLink {
    src: NodeId,
    field: Option<String>,
    dest: Option<NodeId>,
    /// Row id of `dest`, once written.
    dest_id: Option<RowId>,
}

impl PendingLink {
    fn can_store(&self) -> bool {
        self.dest.is_none() || self.dest_id.is_some()
    }
}

impl fmt::Display for PendingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.field, self.dest) {
            (Some(field), Some(dest)) => write!(f, "{}.{field} -> {dest}", self.src),
            _ => write!(f, "{}", self.src),
        }
    }
}

/// Per node bookkeeping of one commit attempt.
#[derive(Debug, Clone)]
struct NodeState {
    table: String,
    /// Link-free values, foreign keys filled in as their ids become known.
    no_link: IndexMap<String, Value>,
    /// Values carried by the writes so far.
    sent: IndexMap<String, Value>,
    /// The row as stored by the last write.
    row: Option<Row>,
}

impl NodeState {
    fn unsent(&self) -> IndexMap<String, Value> {
        self.no_link
            .iter()
            .filter(|(k, v)| self.sent.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Write {
    node: NodeId,
    kind: ModificationKind,
    fields: Vec<String>,
    row: Row,
}

/// State of one commit attempt, created by [`CommitPlan::reset`] and
/// dropped when the commit ends.
#[derive(Debug)]
struct CommitPlan {
    mode: StoreMode,
    states: IndexMap<NodeId, NodeState>,
    pending: VecDeque<PendingLink>,
    writes: Vec<Write>,
}

impl CommitPlan {
    /// Snapshots every member of the cluster of `node` and validates it.
    fn reset(graph: &RowGraph, node: NodeId, mode: StoreMode) -> Result<Self, CommitError> {
        let schema = graph.schema();
        let cluster = graph.cluster(graph.cluster_of(node)?)?;
        let mut states = IndexMap::with_capacity(cluster.size());
        for &member in cluster.items() {
            let vals = graph.node(member)?;
            let def = schema.table(vals.table())?;
            let links: Vec<&str> = vals.foreigns().map(|(f, _)| f).collect();
            let inserting = match mode {
                StoreMode::Insert { .. } => true,
                StoreMode::Commit => !vals.has_id(),
            };
            def.validate(vals.scalars(), &links, inserting)
                .map_err(CommitError::Validation)?;
            states.insert(
                member,
                NodeState {
                    table: vals.table().to_string(),
                    no_link: vals.no_link_values(),
                    sent: IndexMap::new(),
                    row: None,
                },
            );
        }
        let pending = cluster
            .links()
            .iter()
            .map(|l| PendingLink {
                src: l.src,
                field: l.field.clone(),
                dest: l.dest,
                dest_id: None,
            })
            .collect();
        Ok(CommitPlan {
            mode,
            states,
            pending,
            writes: Vec::new(),
        })
    }

    fn state(&self, node: NodeId) -> Result<&NodeState, CommitError> {
        self.states
            .get(&node)
            .ok_or_else(|| CommitError::invariant(format!("node {node} is not being committed")))
    }

    fn state_mut(&mut self, node: NodeId) -> Result<&mut NodeState, CommitError> {
        self.states
            .get_mut(&node)
            .ok_or_else(|| CommitError::invariant(format!("node {node} is not being committed")))
    }

    /// Whether `src` still has a link waiting for its destination.
    fn is_blocked(&self, src: NodeId) -> bool {
        self.pending.iter().any(|p| p.src == src && !p.can_store())
    }

    /// Empties the worklist, writing through `tx`.
    fn run<T: RowTransaction>(
        &mut self,
        graph: &RowGraph,
        schema: &Schema,
        tx: &mut T,
    ) -> Result<(), CommitError> {
        while !self.pending.is_empty() {
            // a node whose links are all storable is written complete; only
            // a cycle forces an early write with some keys left null
            let link = self
                .pending
                .iter()
                .position(|l| l.can_store() && !self.is_blocked(l.src))
                .or_else(|| self.pending.iter().position(PendingLink::can_store))
                .and_then(|at| self.pending.remove(at))
                .ok_or_else(|| {
                    CommitError::invariant(format!(
                        "{} links left and none can be stored",
                        self.pending.len()
                    ))
                })?;
            let src = link.src;

            // fold every other storable link of src into this write
            let mut last_access = true;
            self.pending.retain(|other| {
                if other.src != src {
                    true
                } else if other.can_store() {
                    false
                } else {
                    last_access = false;
                    true
                }
            });
            trace!(link = %link, last_access, "storing");

            self.write(src, schema, tx)?;
            if last_access {
                self.check_foreign_keys(graph, src)?;
            }
        }
        Ok(())
    }

    fn write<T: RowTransaction>(
        &mut self,
        src: NodeId,
        schema: &Schema,
        tx: &mut T,
    ) -> Result<(), CommitError> {
        let state = self.state(src)?;
        let def = schema.table(&state.table)?;
        let first = state.row.is_none();
        let (row, kind, carried) = match &state.row {
            Some(prev) => {
                let diff = state.unsent();
                if diff.is_empty() {
                    return Err(CommitError::invariant(format!(
                        "rewriting {}[{}] without any new value",
                        prev.table, prev.id
                    )));
                }
                let row = tx.update(&state.table, prev.id, &diff)?;
                (row, ModificationKind::RowUpdated, diff)
            }
            None => {
                let values = state.no_link.clone();
                let known_id = values.get(&def.primary_key).and_then(Value::as_row_id);
                match (self.mode, known_id) {
                    (StoreMode::Commit, Some(id)) => {
                        let row = tx.update(&state.table, id, &values)?;
                        (row, ModificationKind::RowUpdated, values)
                    }
                    (mode, _) => {
                        let row = tx.insert(&state.table, &values, &mode.auto_fields(def))?;
                        (row, ModificationKind::RowAdded, values)
                    }
                }
            }
        };
        debug!(node = %src, row = %row, kind = %kind, fields = carried.len(), "wrote node");

        let id = row.id;
        let fields = carried.keys().cloned().collect();
        let state = self.state_mut(src)?;
        state.sent.extend(carried);
        state.row = Some(row.clone());
        self.writes.push(Write {
            node: src,
            kind,
            fields,
            row,
        });

        if first {
            // unblock the links waiting for src
            for waiting in self.pending.iter_mut().filter(|p| p.dest == Some(src)) {
                waiting.dest_id = Some(id);
                if let (Some(field), Some(state)) =
                    (&waiting.field, self.states.get_mut(&waiting.src))
                {
                    state.no_link.insert(field.clone(), Value::Integer(id.0));
                }
            }
        }
        Ok(())
    }

    /// Checks that the row of `src` refers to the rows written for its
    /// foreign nodes.
    fn check_foreign_keys(&self, graph: &RowGraph, src: NodeId) -> Result<(), CommitError> {
        let row = self.state(src)?.row.as_ref().ok_or_else(|| {
            CommitError::invariant(format!("node {src} checked before being written"))
        })?;
        for (field, dest) in graph.node(src)?.foreigns() {
            let expected = self
                .state(dest)?
                .row
                .as_ref()
                .map(|r| r.id)
                .ok_or_else(|| {
                    CommitError::invariant(format!(
                        "last write of node {src} but its foreign node {dest} is not stored"
                    ))
                })?;
            let stored = row.get(field).cloned().unwrap_or(Value::Null);
            if stored.as_row_id() != Some(expected) {
                return Err(CommitError::Integrity {
                    table: row.table.clone(),
                    id: row.id,
                    field: field.to_string(),
                    stored,
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Builds the resolved copy: one node per committed node holding its
    /// stored row, linked like the originals. Nodes created are recorded in
    /// `created` so that a failure can drop them.
    fn resolve(
        &self,
        graph: &mut RowGraph,
        created: &mut Vec<NodeId>,
    ) -> Result<IndexMap<NodeId, NodeId>, CommitError> {
        let mut resolved = IndexMap::with_capacity(self.states.len());
        for (&node, state) in &self.states {
            let row = state
                .row
                .as_ref()
                .ok_or_else(|| CommitError::invariant(format!("node {node} was never written")))?;
            let copy = graph.create_with(&state.table, row.values.clone())?;
            created.push(copy);
            resolved.insert(node, copy);
        }
        let copy_of = |n: NodeId| {
            resolved
                .get(&n)
                .copied()
                .ok_or_else(|| CommitError::invariant(format!("node {n} has no resolved copy")))
        };
        for &node in self.states.keys() {
            let links: Vec<(String, NodeId)> = graph
                .node(node)?
                .foreigns()
                .map(|(f, d)| (f.to_string(), d))
                .collect();
            for (field, dest) in links {
                graph.put_link(copy_of(node)?, &field, copy_of(dest)?)?;
            }
        }
        Ok(resolved)
    }

    fn events(&self, resolved: &IndexMap<NodeId, NodeId>) -> Vec<TableEvent> {
        self.writes
            .iter()
            .map(|w| TableEvent {
                table: w.row.table.clone(),
                id: w.row.id,
                kind: w.kind,
                fields: w.fields.clone(),
                row: w.row.clone(),
                values: resolved.get(&w.node).copied(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Persists the whole cluster of `node` atomically.
///
/// Validation runs before the store is touched. Any failure rolls the
/// transaction back and leaves both the store and `graph` as they were.
/// On success `graph` also holds the resolved copy of the cluster, see
/// [`CommitOutcome::resolved`].
pub fn store<S: RowStore>(
    graph: &mut RowGraph,
    node: NodeId,
    store: &mut S,
    mode: StoreMode,
) -> Result<CommitOutcome, CommitError> {
    let mut plan = CommitPlan::reset(graph, node, mode)?;
    debug!(
        node = %node,
        nodes = plan.states.len(),
        links = plan.pending.len(),
        "commit started"
    );

    let resolved = match execute(&mut plan, graph, store) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(node = %node, error = %e, "commit rolled back");
            return Err(e);
        }
    };

    let events = plan.events(&resolved);
    for event in &events {
        store.bus().fire(event);
    }
    info!(
        node = %node,
        writes = events.len(),
        updates = events
            .iter()
            .filter(|e| e.kind == ModificationKind::RowUpdated)
            .count(),
        "commit done"
    );
    Ok(CommitOutcome { events, resolved })
}

fn execute<S: RowStore>(
    plan: &mut CommitPlan,
    graph: &mut RowGraph,
    store: &mut S,
) -> Result<IndexMap<NodeId, NodeId>, CommitError> {
    let schema = std::sync::Arc::clone(store.schema());
    let mut tx = store.transaction()?;
    plan.run(graph, &schema, &mut tx)?;

    let mut created = Vec::new();
    let resolved = plan
        .resolve(graph, &mut created)
        .and_then(|resolved| {
            tx.commit()?;
            Ok(resolved)
        });
    if resolved.is_err() {
        for copy in created {
            if graph.contains_node(copy) {
                graph.discard(copy)?;
            }
        }
    }
    resolved
}

/// Deletes one row in its own transaction and publishes the deletion.
pub fn delete<S: RowStore>(
    store: &mut S,
    table: &str,
    id: RowId,
) -> Result<TableEvent, StorageError> {
    let mut tx = store.transaction()?;
    let row = tx.delete(table, id)?;
    tx.commit()?;
    let event = TableEvent {
        table: row.table.clone(),
        id,
        kind: ModificationKind::RowDeleted,
        fields: row.values.keys().cloned().collect(),
        row,
        values: None,
    };
    store.bus().fire(&event);
    Ok(event)
}
