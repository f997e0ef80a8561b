//! RowGraph: the arena owning every row-value node and every cluster.
//!
//! [`RowGraph`] is the single entry point for building and mutating graphs of
//! rows. Nodes live in a petgraph `StableGraph` whose edges mirror the links
//! stored in node values; the edges form the referent index (who points at
//! me, in link insertion order) and drive the reachability checks that keep
//! clusters equal to connected components.
//!
//! # Ownership
//!
//! Every node belongs to exactly one [`Cluster`], recorded both in the node
//! (`RowValues::cluster`) and in the cluster's member set. All mutations go
//! through `RowGraph` methods, which move nodes between clusters in bulk when
//! links merge or split components. Node handles are never reused, even once
//! a cluster is [discarded](RowGraph::discard).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use petgraph::Direction::{Incoming, Outgoing};
use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, Link};
use crate::error::CoreError;
use crate::id::{ClusterId, NodeId, RowId};
use crate::listener::ValueChangeEvent;
use crate::node::RowValues;
use crate::schema::{FieldRef, Schema};
use crate::value::{FieldValue, Value};

/// Edge weight mirroring one link `src.field -> dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignLink {
    pub field: String,
    /// Global insertion sequence, orders referents.
    pub seq: u64,
}

/// The row-value arena.
#[derive(Debug, Clone)]
pub struct RowGraph {
    schema: Arc<Schema>,
    pub(crate) arena: StableGraph<RowValues, ForeignLink, Directed, u32>,
    pub(crate) clusters: HashMap<ClusterId, Cluster>,
    next_cluster: u32,
    next_seq: u64,
}

impl RowGraph {
    pub fn new(schema: Arc<Schema>) -> Self {
        RowGraph {
            schema,
            arena: StableGraph::new(),
            clusters: HashMap::new(),
            next_cluster: 0,
            next_seq: 0,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    // -----------------------------------------------------------------------
    // Node creation
    // -----------------------------------------------------------------------

    /// Creates an empty node of `table` in a new singleton cluster.
    pub fn create(&mut self, table: &str) -> Result<NodeId, CoreError> {
        let def = self.schema.table(table)?;
        let (name, pk) = (def.name.clone(), def.primary_key.clone());
        let cluster = self.alloc_cluster();
        let node: NodeId = self
            .arena
            .add_node(RowValues::new(&name, &pk, cluster))
            .into();
        self.cluster_entry(cluster)?.push_item(node);

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(node)
    }

    /// Creates a node of `table` holding `values`.
    pub fn create_with<I, K, V>(&mut self, table: &str, values: I) -> Result<NodeId, CoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let node = self.create(table)?;
        self.load(node, values)?;
        Ok(node)
    }

    pub(crate) fn alloc_cluster(&mut self) -> ClusterId {
        let id = ClusterId(self.next_cluster);
        self.next_cluster += 1;
        self.clusters.insert(id, Cluster::new(id));
        id
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub(crate) fn cluster_entry(&mut self, id: ClusterId) -> Result<&mut Cluster, CoreError> {
        self.clusters
            .get_mut(&id)
            .ok_or_else(|| CoreError::GraphInconsistency {
                reason: format!("cluster {id} does not exist"),
            })
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut RowValues, CoreError> {
        self.arena
            .node_weight_mut(id.into())
            .ok_or(CoreError::NodeNotFound { id })
    }

    // -----------------------------------------------------------------------
    // Field mutation
    // -----------------------------------------------------------------------

    /// Sets a scalar field. A link previously held by `field` is removed
    /// first, which may split the cluster.
    pub fn put(
        &mut self,
        node: NodeId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), CoreError> {
        let mut values = IndexMap::new();
        values.insert(field.to_string(), value.into());
        self.put_scalars(node, values)
    }

    /// Sets several scalar fields with a single change notification.
    pub fn load<I, K, V>(&mut self, node: NodeId, values: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.put_scalars(node, values)
    }

    fn put_scalars(
        &mut self,
        node: NodeId,
        values: IndexMap<String, Value>,
    ) -> Result<(), CoreError> {
        let table = self.node(node)?.table.clone();
        let def = self.schema.table(&table)?;
        for field in values.keys() {
            def.field(field)?;
        }
        for field in values.keys() {
            if let Some(dest) = self.node(node)?.foreign(field) {
                self.unlink(node, field, dest)?;
            }
        }
        let added: IndexMap<String, FieldValue> = values
            .into_iter()
            .map(|(k, v)| (k, FieldValue::Scalar(v)))
            .collect();
        let n = self.node_mut(node)?;
        for (k, v) in &added {
            n.values.insert(k.clone(), v.clone());
        }

        #[cfg(debug_assertions)]
        self.assert_consistency();

        self.fire_value_change(ValueChangeEvent {
            source: node,
            added,
            removed: Vec::new(),
        })
    }

    /// Points `src.field` at `dest`.
    ///
    /// `field` must be a foreign key of `src`'s table referencing `dest`'s
    /// table. Any previous value of `field` is replaced: an old link is
    /// removed (possibly splitting) before the new one is added (possibly
    /// merging).
    pub fn put_link(&mut self, src: NodeId, field: &str, dest: NodeId) -> Result<(), CoreError> {
        let src_table = self.node(src)?.table.clone();
        let dest_table = self.node(dest)?.table.clone();
        let target = self
            .schema
            .foreign_target(&FieldRef::new(&src_table, field))?;
        if target != dest_table {
            return Err(CoreError::LinkTarget {
                table: src_table,
                field: field.to_string(),
                expected: target.to_string(),
                found: dest_table,
            });
        }
        match self.node(src)?.foreign(field) {
            Some(old) if old == dest => return Ok(()),
            Some(old) => self.unlink(src, field, old)?,
            None => {}
        }
        self.node_mut(src)?
            .values
            .insert(field.to_string(), FieldValue::Link(dest));
        let seq = self.next_seq();
        self.arena.add_edge(
            src.into(),
            dest.into(),
            ForeignLink {
                field: field.to_string(),
                seq,
            },
        );
        self.add_link(src, field, dest)?;

        #[cfg(debug_assertions)]
        self.assert_consistency();

        let mut added = IndexMap::new();
        added.insert(field.to_string(), FieldValue::Link(dest));
        self.fire_value_change(ValueChangeEvent {
            source: src,
            added,
            removed: Vec::new(),
        })
    }

    /// Clears `field`, returning its previous content.
    pub fn remove_field(
        &mut self,
        node: NodeId,
        field: &str,
    ) -> Result<Option<FieldValue>, CoreError> {
        let mut removed = self.remove_fields(node, [field])?;
        Ok(removed.pop().map(|(_, v)| v))
    }

    /// Clears every listed field present on `node`; absent fields are
    /// ignored. Returns what was removed.
    pub fn remove_fields<'a>(
        &mut self,
        node: NodeId,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<(String, FieldValue)>, CoreError> {
        let mut removed = Vec::new();
        for field in fields {
            let Some(old) = self.node(node)?.get(field).cloned() else {
                continue;
            };
            if let FieldValue::Link(dest) = old {
                self.unlink(node, field, dest)?;
            }
            self.node_mut(node)?.values.shift_remove(field);
            removed.push((field.to_string(), old));
        }
        if removed.is_empty() {
            return Ok(removed);
        }

        #[cfg(debug_assertions)]
        self.assert_consistency();

        self.fire_value_change(ValueChangeEvent {
            source: node,
            added: IndexMap::new(),
            removed: removed.iter().map(|(f, _)| f.clone()).collect(),
        })?;
        Ok(removed)
    }

    /// Sets (or clears with `None`) the primary key of `node`.
    pub fn set_id(&mut self, node: NodeId, id: Option<RowId>) -> Result<(), CoreError> {
        let pk = self.node(node)?.primary_key.clone();
        self.put(node, &pk, id)
    }

    /// Drops the edge and the cluster link of `src.field -> dest`, leaving
    /// the field value to the caller.
    fn unlink(&mut self, src: NodeId, field: &str, dest: NodeId) -> Result<(), CoreError> {
        let edge = self
            .arena
            .edges_directed(src.into(), Outgoing)
            .find(|e| e.target() == dest.into() && e.weight().field == field)
            .map(|e| e.id())
            .ok_or_else(|| CoreError::GraphInconsistency {
                reason: format!("no edge for link {src}.{field} -> {dest}"),
            })?;
        self.arena.remove_edge(edge);
        self.remove_link(src, field, dest)
    }

    /// Removes the whole cluster of `node` from the arena.
    ///
    /// Returns the number of nodes dropped.
    pub fn discard(&mut self, node: NodeId) -> Result<usize, CoreError> {
        let id = self.cluster_of(node)?;
        let cluster = self
            .clusters
            .remove(&id)
            .ok_or(CoreError::NotInCluster { node })?;
        for item in cluster.items() {
            self.arena.remove_node((*item).into());
        }

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(cluster.size())
    }

    // -----------------------------------------------------------------------
    // Copies
    // -----------------------------------------------------------------------

    /// Copies the whole cluster of `node`, returning the map from each
    /// original member to its copy. The copy has the same values, the same
    /// link order and no listener.
    pub fn copy_cluster(&mut self, node: NodeId) -> Result<IndexMap<NodeId, NodeId>, CoreError> {
        let source = self.cluster(self.cluster_of(node)?)?.clone();
        let target = self.alloc_cluster();
        let mut map = IndexMap::new();
        for &item in source.items() {
            let orig = self.node(item)?;
            let copy = RowValues::new(&orig.table, &orig.primary_key, target);
            map.insert(item, self.arena.add_node(copy).into());
        }
        let mapped = |n: &NodeId| {
            map.get(n).copied().ok_or_else(|| CoreError::GraphInconsistency {
                reason: format!("link to {n} leaves its cluster"),
            })
        };
        for (&orig, &copy) in &map {
            let mut values = IndexMap::new();
            for (k, v) in &self.node(orig)?.values {
                let v = match v {
                    FieldValue::Link(d) => FieldValue::Link(mapped(d)?),
                    scalar => scalar.clone(),
                };
                values.insert(k.clone(), v);
            }
            self.node_mut(copy)?.values = values;
        }
        let mut edges: Vec<(NodeId, NodeId, ForeignLink)> = Vec::new();
        for &item in source.items() {
            for e in self.arena.edges_directed(item.into(), Outgoing) {
                edges.push((mapped(&item)?, mapped(&e.target().into())?, e.weight().clone()));
            }
        }
        edges.sort_by_key(|(_, _, w)| w.seq);
        for (s, d, w) in edges {
            let seq = self.next_seq();
            self.arena.add_edge(s.into(), d.into(), ForeignLink { field: w.field, seq });
        }
        let mut links = Vec::with_capacity(source.links().len());
        for l in source.links() {
            links.push(Link {
                src: mapped(&l.src)?,
                field: l.field.clone(),
                dest: l.dest.as_ref().map(mapped).transpose()?,
            });
        }
        let cluster = self.cluster_entry(target)?;
        cluster.links = links;
        for &copy in map.values() {
            cluster.items.insert(copy);
        }

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(map)
    }

    /// Copies the whole cluster of `node` and returns the copy of `node`.
    pub fn deep_copy(&mut self, node: NodeId) -> Result<NodeId, CoreError> {
        let map = self.copy_cluster(node)?;
        map.get(&node)
            .copied()
            .ok_or(CoreError::NotInCluster { node })
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Result<&RowValues, CoreError> {
        self.arena
            .node_weight(id.into())
            .ok_or(CoreError::NodeNotFound { id })
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.arena.contains_node(id.into())
    }

    /// Field names of `node`, in insertion order.
    pub fn fields(&self, node: NodeId) -> Result<Vec<&str>, CoreError> {
        Ok(self.node(node)?.fields().collect())
    }

    pub fn value(&self, node: NodeId, field: &str) -> Result<Option<&FieldValue>, CoreError> {
        Ok(self.node(node)?.get(field))
    }

    pub fn foreign(&self, node: NodeId, field: &str) -> Result<Option<NodeId>, CoreError> {
        Ok(self.node(node)?.foreign(field))
    }

    /// Nodes pointing at `node`, as `(referent, field)` in link insertion
    /// order.
    pub fn referents(&self, node: NodeId) -> Result<Vec<(NodeId, &str)>, CoreError> {
        self.node(node)?;
        let mut res: Vec<(u64, NodeId, &str)> = self
            .arena
            .edges_directed(node.into(), Incoming)
            .map(|e| (e.weight().seq, e.source().into(), e.weight().field.as_str()))
            .collect();
        res.sort_by_key(|(seq, _, _)| *seq);
        Ok(res.into_iter().map(|(_, n, f)| (n, f)).collect())
    }

    /// Nodes pointing at `node` through `field` of their table.
    pub fn referents_through(
        &self,
        node: NodeId,
        field: &FieldRef,
    ) -> Result<Vec<NodeId>, CoreError> {
        let mut res = Vec::new();
        for (r, f) in self.referents(node)? {
            if f == field.name && self.node(r)?.table == field.table {
                res.push(r);
            }
        }
        Ok(res)
    }

    pub fn cluster_of(&self, node: NodeId) -> Result<ClusterId, CoreError> {
        Ok(self.node(node)?.cluster)
    }

    pub fn cluster(&self, id: ClusterId) -> Result<&Cluster, CoreError> {
        self.clusters
            .get(&id)
            .ok_or_else(|| CoreError::GraphInconsistency {
                reason: format!("cluster {id} does not exist"),
            })
    }

    /// Members of the cluster of `node`, in membership order.
    pub fn cluster_members(&self, node: NodeId) -> Result<Vec<NodeId>, CoreError> {
        Ok(self.cluster(self.cluster_of(node)?)?.items().iter().copied().collect())
    }

    pub fn cluster_size(&self, node: NodeId) -> Result<usize, CoreError> {
        Ok(self.cluster(self.cluster_of(node)?)?.size())
    }

    pub fn node_count(&self) -> usize {
        self.arena.node_count()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Whether two nodes are connected through links.
    pub fn same_cluster(&self, a: NodeId, b: NodeId) -> Result<bool, CoreError> {
        Ok(self.cluster_of(a)? == self.cluster_of(b)?)
    }

    /// One line per member of the cluster of `node`.
    pub fn dump(&self, node: NodeId) -> Result<String, CoreError> {
        let id = self.cluster_of(node)?;
        let mut out = String::new();
        let _ = writeln!(out, "cluster {id}:");
        for &item in self.cluster(id)?.items() {
            let _ = writeln!(out, "  {}", self.describe(item)?);
        }
        Ok(out)
    }

    /// `TABLE#node{FIELD=value, ID_X=>node}`.
    pub fn describe(&self, node: NodeId) -> Result<String, CoreError> {
        let n = self.node(node)?;
        let fields: Vec<String> = n
            .values
            .iter()
            .map(|(k, v)| match v {
                FieldValue::Scalar(s) => format!("{k}={s}"),
                FieldValue::Link(d) => format!("{k}=>#{d}"),
            })
            .collect();
        Ok(format!("{}#{}{{{}}}", n.table, node, fields.join(", ")))
    }

    // -----------------------------------------------------------------------
    // Debug-mode consistency checks
    // -----------------------------------------------------------------------

    /// Verifies that node values, edges, cluster links and cluster members
    /// all describe the same graph.
    ///
    /// Only called in debug builds (via `cfg(debug_assertions)`).
    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        let mut members = 0;
        for (id, cluster) in &self.clusters {
            members += cluster.size();
            let mut links = 0;
            for &item in cluster.items() {
                let node = self
                    .arena
                    .node_weight(item.into())
                    .unwrap_or_else(|| panic!("cluster {id} lists missing node {item}"));
                assert_eq!(node.cluster, *id, "node {item} disagrees on its cluster");
                assert!(
                    cluster.links().iter().any(|l| l.src == item && l.dest.is_none()),
                    "node {item} lost its own link"
                );
                for (field, dest) in node.foreigns() {
                    links += 1;
                    assert!(
                        cluster.items().contains(&dest),
                        "link {item}.{field} leaves cluster {id}"
                    );
                    assert!(
                        self.arena
                            .edges_directed(item.into(), Outgoing)
                            .any(|e| e.target() == dest.into() && e.weight().field == field),
                        "link {item}.{field} has no edge"
                    );
                }
            }
            let stored = cluster.links().iter().filter(|l| l.dest.is_some()).count();
            assert_eq!(stored, links, "cluster {id} link count mismatch");
        }
        assert_eq!(members, self.arena.node_count(), "orphan nodes in arena");
        assert_eq!(
            self.arena.edge_count(),
            self.arena
                .node_weights()
                .map(|n| n.foreigns().count())
                .sum::<usize>(),
            "edge count mismatch"
        );
    }
}
