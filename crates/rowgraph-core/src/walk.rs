//! Generic, cancellable traversal of a cluster.
//!
//! A walk starts at one node and descends through forward links (following
//! foreign keys), backward links (following referents) or both, calling a
//! transform at every visited node. The transform receives a [`WalkState`]
//! describing where the walk is and returns a [`Visit`]: either the
//! accumulator handed to the children, or a stop.
//!
//! Sibling order is deterministic: forward links before backward ones, fields
//! sorted by their quoted name, links sharing a field in insertion order.
//! A node already on the current node path is skipped, so a node reachable
//! through two paths is visited once per path while cycles terminate.

use smallvec::SmallVec;
use thiserror::Error;

use crate::error::CoreError;
use crate::graph::RowGraph;
use crate::id::NodeId;
use crate::node::RowValues;
use crate::path::{Path, Step};
use crate::schema::FieldRef;

/// When the transform runs relative to the children of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursionType {
    /// Transform first, then children, which see the computed accumulator.
    BreadthFirst,
    /// Children first, then the transform.
    DepthFirst,
}

/// Which links a walk follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Both,
}

impl Direction {
    fn forward(self) -> bool {
        matches!(self, Direction::Forward | Direction::Both)
    }

    fn backward(self) -> bool {
        matches!(self, Direction::Backward | Direction::Both)
    }
}

/// Outcome of the transform at one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Visit<T> {
    /// Keep going; children receive this accumulator.
    Continue(T),
    /// Skip what is left of this branch. The siblings are still visited.
    StopBranch(Option<String>),
    /// Abort the whole walk.
    StopAll(Option<String>),
}

impl<T> Visit<T> {
    pub fn stop(message: impl Into<String>) -> Self {
        Visit::StopAll(Some(message.into()))
    }
}

/// Why a walk ended early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("walk stopped: {}", .message.as_deref().unwrap_or("no reason given"))]
pub struct StopRecurse {
    pub message: Option<String>,
    /// `false` for a branch stop raised by the start node itself.
    pub completely: bool,
}

/// Position of a walk.
pub struct WalkState<'g, T> {
    graph: &'g RowGraph,
    current: &'g RowValues,
    vals_path: SmallVec<[NodeId; 8]>,
    path: Path,
    acc: T,
}

impl<'g, T> WalkState<'g, T> {
    pub fn graph(&self) -> &'g RowGraph {
        self.graph
    }

    /// The node being visited.
    pub fn current(&self) -> NodeId {
        self.vals_path[self.vals_path.len() - 1]
    }

    /// Values of the node being visited.
    pub fn values(&self) -> &'g RowValues {
        self.current
    }

    /// The node this one was reached from, `None` at the start.
    pub fn previous(&self) -> Option<NodeId> {
        let len = self.vals_path.len();
        (len >= 2).then(|| self.vals_path[len - 2])
    }

    /// Nodes from the start to the current one.
    pub fn vals_path(&self) -> &[NodeId] {
        &self.vals_path
    }

    /// Tables and fields crossed from the start.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The field crossed to reach the current node.
    pub fn from(&self) -> Option<&FieldRef> {
        self.path.length().checked_sub(1).and_then(|i| self.path.single_step(i))
    }

    /// Whether the last step followed a referent; `None` at the start.
    pub fn is_backwards(&self) -> Option<bool> {
        self.path
            .length()
            .checked_sub(1)
            .and_then(|i| self.path.is_backwards(i))
    }

    pub fn acc(&self) -> &T {
        &self.acc
    }
}

/// A field reached by [`RowGraph::walk_fields`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub path: Path,
    pub field: String,
}

impl RowGraph {
    /// Walks the cluster of `start`.
    ///
    /// Returns `Ok(None)` when every reachable node was visited, or the stop
    /// that ended the walk. A branch stop only ends the walk if raised at
    /// `start`.
    pub fn walk<T, F>(
        &self,
        start: NodeId,
        acc: T,
        mut transform: F,
        recursion: RecursionType,
        direction: Direction,
    ) -> Result<Option<StopRecurse>, CoreError>
    where
        T: Clone,
        F: FnMut(&WalkState<'_, T>) -> Visit<T>,
    {
        let current = self.node(start)?;
        let mut vals_path = SmallVec::new();
        vals_path.push(start);
        let state = WalkState {
            graph: self,
            current,
            vals_path,
            path: Path::new(&current.table),
            acc,
        };
        self.walk_state(state, &mut transform, recursion, direction)
    }

    fn walk_state<'g, T, F>(
        &'g self,
        mut state: WalkState<'g, T>,
        transform: &mut F,
        recursion: RecursionType,
        direction: Direction,
    ) -> Result<Option<StopRecurse>, CoreError>
    where
        T: Clone,
        F: FnMut(&WalkState<'_, T>) -> Visit<T>,
    {
        if recursion == RecursionType::BreadthFirst {
            if let Some(stop) = compute(&mut state, transform) {
                return Ok(Some(stop));
            }
        }
        for forward in [true, false] {
            if (forward && !direction.forward()) || (!forward && !direction.backward()) {
                continue;
            }
            if let Some(stop) = self.rec(&state, transform, recursion, direction, forward)? {
                return Ok(Some(stop));
            }
        }
        if recursion == RecursionType::DepthFirst {
            if let Some(stop) = compute(&mut state, transform) {
                return Ok(Some(stop));
            }
        }
        Ok(None)
    }

    fn rec<'g, T, F>(
        &'g self,
        state: &WalkState<'g, T>,
        transform: &mut F,
        recursion: RecursionType,
        direction: Direction,
        forward: bool,
    ) -> Result<Option<StopRecurse>, CoreError>
    where
        T: Clone,
        F: FnMut(&WalkState<'_, T>) -> Visit<T>,
    {
        for (field, next) in self.neighbours(state.current(), forward)? {
            if state.vals_path.contains(&next) {
                continue;
            }
            let values = self.node(next)?;
            let mut path = state.path.clone();
            path.push(Step::single(state.path.last(), &values.table, field, forward))?;
            let mut vals_path = state.vals_path.clone();
            vals_path.push(next);
            let child = WalkState {
                graph: self,
                current: values,
                vals_path,
                path,
                acc: state.acc.clone(),
            };
            match self.walk_state(child, transform, recursion, direction)? {
                Some(stop) if stop.completely => return Ok(Some(stop)),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Links of `node` in walk order: forward ones as `(own field, target)`,
    /// backward ones as `(referent's field, referent)`.
    pub(crate) fn neighbours(
        &self,
        node: NodeId,
        forward: bool,
    ) -> Result<Vec<(FieldRef, NodeId)>, CoreError> {
        let mut res: Vec<(FieldRef, NodeId)> = if forward {
            let n = self.node(node)?;
            n.foreigns()
                .map(|(f, dest)| (FieldRef::new(&n.table, f), dest))
                .collect()
        } else {
            let mut res = Vec::new();
            for (referent, f) in self.referents(node)? {
                res.push((FieldRef::new(&self.node(referent)?.table, f), referent));
            }
            res
        };
        // stable: links sharing a field keep their insertion order
        res.sort_by_cached_key(|(f, _)| f.quoted());
        Ok(res)
    }

    /// Lists every `(path, field)` reachable from `start` through forward
    /// links, fields in insertion order. Link fields are listed only when
    /// `include_foreign` is set, but are followed regardless.
    pub fn walk_fields(
        &self,
        start: NodeId,
        include_foreign: bool,
    ) -> Result<Vec<FieldPath>, CoreError> {
        let mut res = Vec::new();
        let path = Path::new(&self.node(start)?.table);
        self.walk_fields_rec(start, path, &mut vec![start], include_foreign, &mut res)?;
        Ok(res)
    }

    fn walk_fields_rec(
        &self,
        current: NodeId,
        path: Path,
        vals_path: &mut Vec<NodeId>,
        include_foreign: bool,
        res: &mut Vec<FieldPath>,
    ) -> Result<(), CoreError> {
        let node = self.node(current)?;
        for (field, value) in &node.values {
            let dest = value.as_link();
            if dest.is_none() || include_foreign {
                res.push(FieldPath {
                    path: path.clone(),
                    field: field.clone(),
                });
            }
            let Some(dest) = dest else { continue };
            if vals_path.contains(&dest) {
                continue;
            }
            let dest_table = &self.node(dest)?.table;
            let step = Step::single(&node.table, dest_table, FieldRef::new(&node.table, field), true);
            let next = path.add(step)?;
            vals_path.push(dest);
            self.walk_fields_rec(dest, next, vals_path, include_foreign, res)?;
            vals_path.pop();
        }
        Ok(())
    }
}

fn compute<T, F>(state: &mut WalkState<'_, T>, transform: &mut F) -> Option<StopRecurse>
where
    F: FnMut(&WalkState<'_, T>) -> Visit<T>,
{
    match transform(&*state) {
        Visit::Continue(acc) => {
            state.acc = acc;
            None
        }
        Visit::StopBranch(message) => Some(StopRecurse {
            message,
            completely: false,
        }),
        Visit::StopAll(message) => Some(StopRecurse {
            message,
            completely: true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{campus, named, sample_graph};

    fn visit_order(
        graph: &RowGraph,
        start: NodeId,
        recursion: RecursionType,
        direction: Direction,
    ) -> Vec<NodeId> {
        let mut seen = Vec::new();
        let stop = graph
            .walk(
                start,
                (),
                |s| {
                    seen.push(s.current());
                    Visit::Continue(())
                },
                recursion,
                direction,
            )
            .unwrap();
        assert_eq!(stop, None);
        seen
    }

    #[test]
    fn breadth_first_computes_before_children() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let order = visit_order(&graph, c.batiment, RecursionType::BreadthFirst, Direction::Backward);
        let [a, b, l3] = c.locals;
        let [a1, a2, c1] = c.cpis;
        assert_eq!(order, vec![c.batiment, a, a1, a2, b, l3, c1]);
    }

    #[test]
    fn depth_first_computes_after_children() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let order = visit_order(&graph, c.batiment, RecursionType::DepthFirst, Direction::Backward);
        let [a, b, l3] = c.locals;
        let [a1, a2, c1] = c.cpis;
        assert_eq!(order, vec![a1, a2, a, b, c1, l3, c.batiment]);
    }

    #[test]
    fn both_directions_visit_forward_links_first() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let [a, b, l3] = c.locals;
        let [a1, a2, c1] = c.cpis;
        let order = visit_order(&graph, a1, RecursionType::BreadthFirst, Direction::Both);
        assert_eq!(order, vec![a1, a, c.batiment, b, l3, c1, a2]);

        let forward = visit_order(&graph, a1, RecursionType::BreadthFirst, Direction::Forward);
        assert_eq!(forward, vec![a1, a, c.batiment]);
    }

    #[test]
    fn both_orders_visit_the_same_nodes() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        graph.put_link(c.locals[1], "ID_LOCAL_PARENT", c.locals[2]).unwrap();
        for start in [c.batiment, c.cpis[2], c.locals[1]] {
            let mut bfs = visit_order(&graph, start, RecursionType::BreadthFirst, Direction::Both);
            let mut dfs = visit_order(&graph, start, RecursionType::DepthFirst, Direction::Both);
            assert_eq!(bfs.len(), dfs.len());
            bfs.sort();
            dfs.sort();
            assert_eq!(bfs, dfs);
        }
    }

    #[test]
    fn diamonds_are_visited_once_per_path() {
        let mut graph = sample_graph();
        let bat = named(&mut graph, "BATIMENT", "b");
        let parent = named(&mut graph, "LOCAL", "p");
        let room = named(&mut graph, "LOCAL", "r");
        let cpi = named(&mut graph, "CPI_BT", "c");
        graph.put_link(parent, "ID_BATIMENT", bat).unwrap();
        graph.put_link(room, "ID_LOCAL_PARENT", parent).unwrap();
        graph.put_link(room, "ID_BATIMENT", bat).unwrap();
        graph.put_link(cpi, "ID_LOCAL", room).unwrap();

        let order = visit_order(&graph, cpi, RecursionType::BreadthFirst, Direction::Forward);
        // "LOCAL"."ID_BATIMENT" sorts before "LOCAL"."ID_LOCAL_PARENT"
        assert_eq!(order, vec![cpi, room, bat, parent, bat]);
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = sample_graph();
        let site = named(&mut graph, "SITE", "s");
        let contact = named(&mut graph, "CONTACT", "c");
        graph.put_link(site, "ID_CONTACT_RAPPORT", contact).unwrap();
        graph.put_link(contact, "ID_SITE", site).unwrap();
        let order = visit_order(&graph, site, RecursionType::BreadthFirst, Direction::Both);
        // forward to the contact, then backward to it through ID_SITE
        assert_eq!(order, vec![site, contact, contact]);
    }

    #[test]
    fn paths_and_accumulators_follow_the_walk() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let mut seen = Vec::new();
        graph
            .walk(
                c.batiment,
                0usize,
                |s| {
                    assert_eq!(*s.acc(), s.path().length());
                    seen.push((s.current(), s.path().to_string(), s.is_backwards(), s.previous()));
                    Visit::Continue(s.acc() + 1)
                },
                RecursionType::BreadthFirst,
                Direction::Backward,
            )
            .unwrap();
        assert_eq!(seen[0], (c.batiment, "BATIMENT".to_string(), None, None));
        assert_eq!(
            seen[2],
            (
                c.cpis[0],
                "BATIMENT [^LOCAL.ID_BATIMENT] LOCAL [^CPI_BT.ID_LOCAL] CPI_BT".to_string(),
                Some(true),
                Some(c.locals[0]),
            )
        );
    }

    #[test]
    fn branch_stop_skips_children_only() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let mut seen = Vec::new();
        let stop = graph
            .walk(
                c.batiment,
                (),
                |s| {
                    seen.push(s.current());
                    if s.current() == c.locals[0] {
                        Visit::StopBranch(None)
                    } else {
                        Visit::Continue(())
                    }
                },
                RecursionType::BreadthFirst,
                Direction::Backward,
            )
            .unwrap();
        assert_eq!(stop, None);
        assert_eq!(
            seen,
            vec![c.batiment, c.locals[0], c.locals[1], c.locals[2], c.cpis[2]]
        );
    }

    #[test]
    fn full_stop_propagates_its_message() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let mut count = 0;
        let stop = graph
            .walk(
                c.batiment,
                (),
                |s| {
                    count += 1;
                    if s.current() == c.cpis[0] {
                        Visit::stop("found a1")
                    } else {
                        Visit::Continue(())
                    }
                },
                RecursionType::BreadthFirst,
                Direction::Backward,
            )
            .unwrap();
        assert_eq!(
            stop,
            Some(StopRecurse {
                message: Some("found a1".into()),
                completely: true
            })
        );
        assert_eq!(count, 3);
    }

    #[test]
    fn walk_from_a_missing_node_errors() {
        let graph = sample_graph();
        let res = graph.walk(
            NodeId(42),
            (),
            |_| Visit::Continue(()),
            RecursionType::BreadthFirst,
            Direction::Both,
        );
        assert_eq!(res.unwrap_err(), CoreError::NodeNotFound { id: NodeId(42) });
    }

    #[test]
    fn walk_fields_follows_forward_links() {
        let mut graph = sample_graph();
        let bat = named(&mut graph, "BATIMENT", "b");
        let room = named(&mut graph, "LOCAL", "r");
        graph.put_link(room, "ID_BATIMENT", bat).unwrap();
        let cpi = named(&mut graph, "CPI_BT", "c");
        graph.put_link(cpi, "ID_LOCAL", room).unwrap();

        let fields: Vec<String> = graph
            .walk_fields(cpi, false)
            .unwrap()
            .into_iter()
            .map(|fp| format!("{}:{}", fp.path.last(), fp.field))
            .collect();
        assert_eq!(fields, vec!["CPI_BT:DESIGNATION", "LOCAL:DESIGNATION", "BATIMENT:DESIGNATION"]);

        let with_keys = graph.walk_fields(cpi, true).unwrap();
        assert_eq!(with_keys.len(), 5);
        assert_eq!(with_keys[1].field, "ID_LOCAL");
    }
}
