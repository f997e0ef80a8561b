//! Structural algorithms built on [`RowGraph::walk`].
//!
//! Shapes (templates) are plain row-value graphs whose nodes only matter for
//! their table, the set of fields they carry and their forward links. Every
//! algorithm here walks the shape forward, breadth first, and looks up the
//! corresponding position of the other graph with [`RowGraph::follow_path`].

use indexmap::IndexMap;

use crate::error::CoreError;
use crate::graph::RowGraph;
use crate::id::NodeId;
use crate::path::Path;
use crate::value::{FieldValue, Value};
use crate::walk::{Direction, RecursionType, Visit};

/// One node of a graph being pruned, before it is materialized.
struct Planned {
    parent: Option<(usize, String)>,
    table: String,
    values: IndexMap<String, Value>,
}

impl RowGraph {
    fn check_same_table(&self, a: NodeId, b: NodeId) -> Result<(), CoreError> {
        let (ta, tb) = (&self.node(a)?.table, &self.node(b)?.table);
        if ta != tb {
            return Err(CoreError::TableMismatch {
                expected: ta.clone(),
                found: tb.clone(),
            });
        }
        Ok(())
    }

    fn check_path_start(&self, start: NodeId, path: &Path) -> Result<(), CoreError> {
        let table = &self.node(start)?.table;
        if table != path.first() {
            return Err(CoreError::TableMismatch {
                expected: path.first().to_string(),
                found: table.clone(),
            });
        }
        Ok(())
    }

    /// The node reached from `start` along `path`, `None` if some link is
    /// missing. A backward step resolves to the first referent, in insertion
    /// order; a multi-field step tries its fields in order.
    pub fn follow_path(&self, start: NodeId, path: &Path) -> Result<Option<NodeId>, CoreError> {
        self.check_path_start(start, path)?;
        let mut current = start;
        for step in path.steps() {
            let mut next = None;
            for (field, &forward) in step.fields() {
                next = if forward {
                    self.node(current)?.foreign(&field.name)
                } else {
                    self.referents_through(current, field)?.first().copied()
                };
                if next.is_some() {
                    break;
                }
            }
            match next {
                Some(n) => current = n,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Like [`follow_path`](Self::follow_path) but creates, and links, every
    /// missing node. Every step of `path` must be a single field.
    pub fn assure_path(&mut self, start: NodeId, path: &Path) -> Result<NodeId, CoreError> {
        self.check_path_start(start, path)?;
        let mut current = start;
        for step in path.steps() {
            let field = step.single_field().ok_or_else(|| CoreError::AmbiguousStep {
                from: step.from().to_string(),
                to: step.to().to_string(),
                reason: format!("cannot create a row through {step}"),
            })?;
            let forward = step.fields()[field];
            let existing = if forward {
                self.node(current)?.foreign(&field.name)
            } else {
                self.referents_through(current, field)?.first().copied()
            };
            current = match existing {
                Some(n) => n,
                None => {
                    let created = self.create(step.to())?;
                    if forward {
                        self.put_link(current, &field.name, created)?;
                    } else {
                        self.put_link(created, &field.name, current)?;
                    }
                    created
                }
            };
        }
        Ok(current)
    }

    /// Whether every forward path of `pattern` exists from `start`, and with
    /// `check_fields`, whether each reached node carries at least the fields
    /// of the corresponding pattern node.
    ///
    /// Returns `None` when contained, else a description of the first
    /// violation.
    pub fn contains(
        &self,
        start: NodeId,
        pattern: NodeId,
        check_fields: bool,
    ) -> Result<Option<String>, CoreError> {
        self.check_same_table(start, pattern)?;
        let mut failure = None;
        let stop = self.walk(
            pattern,
            (),
            |s| match self.follow_path(start, s.path()) {
                Ok(None) => Visit::stop(format!("no {} in {}", s.path(), self.label(start))),
                Ok(Some(found)) => match self.node(found) {
                    Ok(v) if check_fields && !v.has_fields_of(s.values()) => Visit::stop(format!(
                        "at {} {:?} does not contain {:?}",
                        s.path(),
                        v.fields().collect::<Vec<_>>(),
                        s.values().fields().collect::<Vec<_>>()
                    )),
                    Ok(_) => Visit::Continue(()),
                    Err(e) => {
                        failure = Some(e);
                        Visit::StopAll(None)
                    }
                },
                Err(e) => {
                    failure = Some(e);
                    Visit::StopAll(None)
                }
            },
            RecursionType::BreadthFirst,
            Direction::Forward,
        )?;
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(stop.map(|s| s.message.unwrap_or_default()))
    }

    /// Builds a new detached graph with the shape of `shape` and the values
    /// found at the same positions from `start`.
    ///
    /// Each shape node yields a new node carrying exactly the shape node's
    /// fields: scalars are copied, links of the source become the target's
    /// row id, and positions missing from the source are null. Forward links
    /// of the shape are then recreated between the new nodes.
    pub fn prune(&mut self, start: NodeId, shape: NodeId) -> Result<NodeId, CoreError> {
        self.check_same_table(start, shape)?;
        let mut plan: Vec<Planned> = Vec::new();
        let mut failure = None;
        let this = &*self;
        this.walk(
            shape,
            0usize,
            |s| {
                let parent = match (s.path().length(), s.from()) {
                    (0, _) => None,
                    (_, Some(from)) => Some((*s.acc(), from.name.clone())),
                    (_, None) => {
                        failure = Some(CoreError::GraphInconsistency {
                            reason: format!("walk reached {} through no field", s.current()),
                        });
                        return Visit::StopAll(None);
                    }
                };
                let values = match this.values_at(start, s.path(), s.values().fields()) {
                    Ok(v) => v,
                    Err(e) => {
                        failure = Some(e);
                        return Visit::StopAll(None);
                    }
                };
                plan.push(Planned {
                    parent,
                    table: s.values().table.clone(),
                    values,
                });
                Visit::Continue(plan.len() - 1)
            },
            RecursionType::BreadthFirst,
            Direction::Forward,
        )?;
        if let Some(e) = failure {
            return Err(e);
        }

        let mut created: Vec<NodeId> = Vec::with_capacity(plan.len());
        for entry in plan {
            let node = self.create(&entry.table)?;
            self.load(node, entry.values)?;
            if let Some((parent, field)) = entry.parent {
                self.put_link(created[parent], &field, node)?;
            }
            created.push(node);
        }
        created.first().copied().ok_or(CoreError::NodeNotFound { id: shape })
    }

    /// Flat values of `fields` at `path` from `start`.
    fn values_at<'a>(
        &self,
        start: NodeId,
        path: &Path,
        fields: impl Iterator<Item = &'a str>,
    ) -> Result<IndexMap<String, Value>, CoreError> {
        let source = match self.follow_path(start, path)? {
            Some(n) => Some(self.node(n)?),
            None => None,
        };
        let mut res = IndexMap::new();
        for f in fields {
            let v = match source.and_then(|n| n.get(f)) {
                Some(FieldValue::Scalar(v)) => v.clone(),
                Some(FieldValue::Link(d)) => self.node(*d)?.id().into(),
                None => Value::Null,
            };
            res.insert(f.to_string(), v);
        }
        Ok(res)
    }

    /// Whether `a` and `b` root equal graphs: same size, and the same values
    /// at every position of a breadth-first walk in both directions.
    ///
    /// Only node identity short-circuits: two distinct nodes are compared
    /// even when they share a cluster.
    pub fn deep_equals(&self, a: NodeId, b: NodeId) -> Result<bool, CoreError> {
        if a == b {
            self.node(a)?;
            return Ok(true);
        }
        let (na, nb) = (self.node(a)?, self.node(b)?);
        if self.cluster_size(a)? != self.cluster_size(b)? || !na.equals_just_this(nb) {
            return Ok(false);
        }
        if self.cluster_size(a)? == 1 {
            return Ok(true);
        }

        let mut flat: Vec<(NodeId, Path)> = Vec::new();
        self.walk(
            a,
            (),
            |s| {
                flat.push((s.current(), s.path().clone()));
                Visit::Continue(())
            },
            RecursionType::BreadthFirst,
            Direction::Both,
        )?;
        let mut index = 0;
        let stop = self.walk(
            b,
            (),
            |s| {
                let Some((expected, path)) = flat.get(index) else {
                    return Visit::stop(format!("extra node at {}", s.path()));
                };
                index += 1;
                let same = path == s.path()
                    && self
                        .node(*expected)
                        .map(|n| n.equals_just_this(s.values()))
                        .unwrap_or(false);
                if same {
                    Visit::Continue(())
                } else {
                    Visit::stop(format!("unequal at {}", s.path()))
                }
            },
            RecursionType::BreadthFirst,
            Direction::Both,
        )?;
        Ok(stop.is_none() && index == flat.len())
    }

    /// `TABLE[id]`, or `TABLE` for rows without id.
    pub(crate) fn label(&self, node: NodeId) -> String {
        match self.node(node) {
            Ok(n) => match n.id() {
                Some(id) => format!("{}[{}]", n.table, id),
                None => n.table.clone(),
            },
            Err(_) => format!("#{node}"),
        }
    }
}
