//! Clusters: connected components of the row-value graph.
//!
//! A [`Cluster`] records its member nodes and every link between them in
//! insertion order. Each node contributes one degenerate link (no field, no
//! destination) when created, so iterating the links of a cluster reaches
//! every node even when it has no foreign key.
//!
//! Adding a link between two clusters merges them: the destination cluster's
//! links are prepended, followed by the new link, then the links already
//! present. Removing a link recomputes reachability from its source and moves
//! everything that became unreachable, links and listener registrations
//! included, into a freshly allocated cluster.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexSet;
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::graph::RowGraph;
use crate::id::{ClusterId, NodeId};
use crate::listener::{ListenerMap, ReferentChangeEvent, SharedListener, ValueChangeEvent};

/// One recorded link, `src.field -> dest`, or the degenerate link of `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub src: NodeId,
    pub field: Option<String>,
    pub dest: Option<NodeId>,
}

impl Link {
    pub(crate) fn degenerate(src: NodeId) -> Self {
        Link {
            src,
            field: None,
            dest: None,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.field.is_none()
    }

    fn is(&self, src: NodeId, field: &str, dest: NodeId) -> bool {
        self.src == src && self.field.as_deref() == Some(field) && self.dest == Some(dest)
    }
}

/// A maximal connected set of nodes.
#[derive(Debug, Clone)]
pub struct Cluster {
    id: ClusterId,
    pub(crate) links: Vec<Link>,
    pub(crate) items: IndexSet<NodeId>,
    pub(crate) listeners: Option<ListenerMap>,
}

impl Cluster {
    pub(crate) fn new(id: ClusterId) -> Self {
        Cluster {
            id,
            links: Vec::new(),
            items: IndexSet::new(),
            listeners: None,
        }
    }

    pub(crate) fn push_item(&mut self, node: NodeId) {
        self.items.insert(node);
        self.links.push(Link::degenerate(node));
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// Every link, degenerate ones included, in insertion order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn items(&self) -> &IndexSet<NodeId> {
        &self.items
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.items.contains(&node)
    }

    pub fn has_listeners(&self) -> bool {
        self.listeners.is_some()
    }
}

impl RowGraph {
    // -----------------------------------------------------------------------
    // Merge / split
    // -----------------------------------------------------------------------

    /// Records `src.field -> dest`, merging the cluster of `dest` into the
    /// cluster of `src` when they differ.
    pub(crate) fn add_link(
        &mut self,
        src: NodeId,
        field: &str,
        dest: NodeId,
    ) -> Result<(), CoreError> {
        let src_cluster = self.cluster_of(src)?;
        let dest_cluster = self.cluster_of(dest)?;
        if !self.cluster(src_cluster)?.contains(src) {
            return Err(CoreError::NotInCluster { node: src });
        }
        let link = Link {
            src,
            field: Some(field.to_string()),
            dest: Some(dest),
        };
        if src_cluster == dest_cluster {
            self.cluster_entry(src_cluster)?.links.push(link);
            return Ok(());
        }

        let other = self
            .clusters
            .remove(&dest_cluster)
            .ok_or(CoreError::NotInCluster { node: dest })?;
        for &item in &other.items {
            self.node_mut(item)?.cluster = src_cluster;
        }
        debug!(
            into = %src_cluster,
            from = %dest_cluster,
            moved = other.items.len(),
            "merging clusters"
        );
        let this = self.cluster_entry(src_cluster)?;
        let mut links = other.links;
        links.push(link);
        links.append(&mut this.links);
        this.links = links;
        let mut items = other.items;
        items.extend(this.items.drain(..));
        this.items = items;
        if let Some(theirs) = other.listeners {
            this.listeners.get_or_insert_with(ListenerMap::default).extend(theirs);
        }
        Ok(())
    }

    /// Forgets `src.field -> dest`, splitting off whatever became
    /// unreachable from `src`, then tells `dest`'s listeners that `src` no
    /// longer refers to it.
    pub(crate) fn remove_link(
        &mut self,
        src: NodeId,
        field: &str,
        dest: NodeId,
    ) -> Result<(), CoreError> {
        let id = self.cluster_of(src)?;
        let cluster = self.cluster_entry(id)?;
        let pos = cluster
            .links
            .iter()
            .position(|l| l.is(src, field, dest))
            .ok_or(CoreError::NotInCluster { node: dest })?;
        cluster.links.remove(pos);
        let size = cluster.size();

        let reachable = self.reachable(src);
        if reachable.len() < size {
            let new_id = self.alloc_cluster();
            let cluster = self.cluster_entry(id)?;
            let (kept, moved_links): (Vec<Link>, Vec<Link>) = cluster
                .links
                .drain(..)
                .partition(|l| reachable.contains(&l.src));
            cluster.links = kept;
            let moved_items: IndexSet<NodeId> = cluster
                .items
                .iter()
                .copied()
                .filter(|n| !reachable.contains(n))
                .collect();
            cluster.items.retain(|n| reachable.contains(n));
            let mut moved_listeners = ListenerMap::default();
            if let Some(map) = cluster.listeners.as_mut() {
                for &n in &moved_items {
                    for l in map.take(n).into_iter().flatten() {
                        moved_listeners.add(n, l);
                    }
                }
                if map.is_empty() {
                    cluster.listeners = None;
                }
            }
            debug!(
                from = %id,
                into = %new_id,
                moved = moved_items.len(),
                "splitting cluster"
            );
            for &n in &moved_items {
                self.node_mut(n)?.cluster = new_id;
            }
            let split = self.cluster_entry(new_id)?;
            split.links = moved_links;
            split.items = moved_items;
            if !moved_listeners.is_empty() {
                split.listeners = Some(moved_listeners);
            }
        }

        self.fire_referent_change(ReferentChangeEvent {
            target: dest,
            field: field.to_string(),
            referent: src,
            addition: false,
        })
    }

    /// Every node connected to `start`, ignoring link direction.
    pub(crate) fn reachable(&self, start: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        while let Some(n) = queue.pop_front() {
            for next in self.arena.neighbors_undirected(n.into()) {
                let next = NodeId::from(next);
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Registers `listener` on `node`; it observes the whole cluster of
    /// `node` for as long as `node` belongs to it.
    pub fn add_listener(
        &mut self,
        node: NodeId,
        listener: SharedListener,
    ) -> Result<(), CoreError> {
        let id = self.cluster_of(node)?;
        self.cluster_entry(id)?
            .listeners
            .get_or_insert_with(ListenerMap::default)
            .add(node, listener);
        Ok(())
    }

    /// Unregisters one registration of `listener` on `node`.
    pub fn remove_listener(
        &mut self,
        node: NodeId,
        listener: &SharedListener,
    ) -> Result<bool, CoreError> {
        let id = self.cluster_of(node)?;
        let cluster = self.cluster_entry(id)?;
        let Some(map) = cluster.listeners.as_mut() else {
            return Ok(false);
        };
        let removed = map.remove(node, listener);
        if map.is_empty() {
            cluster.listeners = None;
        }
        Ok(removed)
    }

    /// Listeners registered on `node` itself.
    pub fn listeners(&self, node: NodeId) -> Result<Vec<SharedListener>, CoreError> {
        let cluster = self.cluster(self.cluster_of(node)?)?;
        Ok(cluster
            .listeners
            .as_ref()
            .map(|m| m.registered_on(node).to_vec())
            .unwrap_or_default())
    }

    fn cluster_listeners(&self, node: NodeId) -> Result<Vec<SharedListener>, CoreError> {
        let cluster = self.cluster(self.cluster_of(node)?)?;
        Ok(cluster.listeners.as_ref().map(ListenerMap::all).unwrap_or_default())
    }

    pub(crate) fn fire_value_change(&self, event: ValueChangeEvent) -> Result<(), CoreError> {
        let listeners = self.cluster_listeners(event.source)?;
        if !listeners.is_empty() {
            trace!(source = %event.source, listeners = listeners.len(), "value change");
        }
        for l in listeners {
            l.value_change(&event);
        }
        Ok(())
    }

    fn fire_referent_change(&self, event: ReferentChangeEvent) -> Result<(), CoreError> {
        // additions are reported by the value change of the referent
        if event.addition {
            return Ok(());
        }
        let listeners = self.cluster_listeners(event.target)?;
        if !listeners.is_empty() {
            trace!(target = %event.target, field = %event.field, "referent removed");
        }
        for l in listeners {
            l.referent_change(&event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::listener::tests::Recorder;
    use crate::test_support::{campus, named, sample_graph};
    use crate::value::FieldValue;

    fn links_of(graph: &RowGraph, node: NodeId) -> Vec<Link> {
        let id = graph.cluster_of(node).unwrap();
        graph.cluster(id).unwrap().links().to_vec()
    }

    fn link(src: NodeId, field: &str, dest: NodeId) -> Link {
        Link {
            src,
            field: Some(field.into()),
            dest: Some(dest),
        }
    }

    #[test]
    fn merge_prepends_destination_links() {
        let mut graph = sample_graph();
        let bat = graph.create("BATIMENT").unwrap();
        let site = graph.create("SITE").unwrap();
        let local = graph.create("LOCAL").unwrap();
        graph.put_link(bat, "ID_SITE", site).unwrap();
        graph.put_link(local, "ID_BATIMENT", bat).unwrap();

        assert_eq!(
            links_of(&graph, local),
            vec![
                Link::degenerate(site),
                link(bat, "ID_SITE", site),
                Link::degenerate(bat),
                link(local, "ID_BATIMENT", bat),
                Link::degenerate(local),
            ]
        );
        assert_eq!(graph.cluster_members(local).unwrap(), vec![site, bat, local]);
        assert_eq!(graph.cluster_count(), 1);
        assert_eq!(graph.cluster_size(site).unwrap(), 3);
    }

    #[test]
    fn link_inside_a_cluster_is_appended() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let before = links_of(&graph, c.batiment);
        graph.put_link(c.locals[1], "ID_LOCAL_PARENT", c.locals[0]).unwrap();
        let after = links_of(&graph, c.batiment);
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after.last(), Some(&link(c.locals[1], "ID_LOCAL_PARENT", c.locals[0])));
    }

    #[test]
    fn removing_a_bridge_splits_in_two() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let original = graph.cluster_of(c.batiment).unwrap();
        graph.remove_field(c.locals[0], "ID_BATIMENT").unwrap();

        assert_eq!(graph.cluster_count(), 2);
        let kept: Vec<NodeId> = graph.cluster_members(c.locals[0]).unwrap();
        assert_eq!(kept, vec![c.locals[0], c.cpis[0], c.cpis[1]]);
        assert_eq!(graph.cluster_size(c.batiment).unwrap(), 4);
        // the side holding the link's source keeps the cluster
        assert_eq!(graph.cluster_of(c.locals[0]).unwrap(), original);
        assert_ne!(graph.cluster_of(c.batiment).unwrap(), original);

        // relative order is kept on each side
        assert_eq!(
            links_of(&graph, c.locals[0]),
            vec![
                Link::degenerate(c.locals[0]),
                link(c.cpis[0], "ID_LOCAL", c.locals[0]),
                Link::degenerate(c.cpis[0]),
                link(c.cpis[1], "ID_LOCAL", c.locals[0]),
                Link::degenerate(c.cpis[1]),
            ]
        );
        assert_eq!(
            links_of(&graph, c.batiment),
            vec![
                Link::degenerate(c.batiment),
                link(c.locals[1], "ID_BATIMENT", c.batiment),
                Link::degenerate(c.locals[1]),
                link(c.locals[2], "ID_BATIMENT", c.batiment),
                Link::degenerate(c.locals[2]),
                link(c.cpis[2], "ID_LOCAL", c.locals[2]),
                Link::degenerate(c.cpis[2]),
            ]
        );
    }

    #[test]
    fn split_then_relink_restores_membership() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let before: HashSet<NodeId> = graph.cluster_members(c.batiment).unwrap().into_iter().collect();
        graph.remove_field(c.locals[2], "ID_BATIMENT").unwrap();
        assert_eq!(graph.cluster_count(), 2);
        graph.put_link(c.locals[2], "ID_BATIMENT", c.batiment).unwrap();
        assert_eq!(graph.cluster_count(), 1);
        let after: HashSet<NodeId> = graph.cluster_members(c.batiment).unwrap().into_iter().collect();
        assert_eq!(before, after);

        // destination side first, then the new link, then the source side
        assert_eq!(
            links_of(&graph, c.locals[2]),
            vec![
                Link::degenerate(c.batiment),
                link(c.locals[0], "ID_BATIMENT", c.batiment),
                Link::degenerate(c.locals[0]),
                link(c.locals[1], "ID_BATIMENT", c.batiment),
                Link::degenerate(c.locals[1]),
                link(c.cpis[0], "ID_LOCAL", c.locals[0]),
                Link::degenerate(c.cpis[0]),
                link(c.cpis[1], "ID_LOCAL", c.locals[0]),
                Link::degenerate(c.cpis[1]),
                link(c.locals[2], "ID_BATIMENT", c.batiment),
                Link::degenerate(c.locals[2]),
                link(c.cpis[2], "ID_LOCAL", c.locals[2]),
                Link::degenerate(c.cpis[2]),
            ]
        );
    }

    #[test]
    fn removing_a_redundant_link_does_not_split() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        graph.put_link(c.locals[1], "ID_LOCAL_PARENT", c.locals[0]).unwrap();
        graph.remove_field(c.locals[1], "ID_LOCAL_PARENT").unwrap();
        assert_eq!(graph.cluster_count(), 1);
        assert_eq!(graph.cluster_size(c.batiment).unwrap(), 7);
    }

    #[test]
    fn cycle_link_keeps_one_cluster() {
        let mut graph = sample_graph();
        let site = named(&mut graph, "SITE", "s");
        let contact = named(&mut graph, "CONTACT", "c");
        graph.put_link(site, "ID_CONTACT_RAPPORT", contact).unwrap();
        graph.put_link(contact, "ID_SITE", site).unwrap();
        graph.remove_field(site, "ID_CONTACT_RAPPORT").unwrap();
        assert!(graph.same_cluster(site, contact).unwrap());
    }

    #[test]
    fn listeners_observe_the_cluster_and_move_on_split() {
        let mut graph = sample_graph();
        let c = campus(&mut graph);
        let recorder = Arc::new(Recorder::default());
        let shared: SharedListener = recorder.clone();
        graph.add_listener(c.cpis[0], shared.clone()).unwrap();

        graph.put(c.batiment, "DESIGNATION", "main").unwrap();
        assert_eq!(recorder.values.lock().unwrap().len(), 1);

        graph.remove_field(c.locals[0], "ID_BATIMENT").unwrap();
        let old = graph.cluster(graph.cluster_of(c.batiment).unwrap()).unwrap();
        assert!(!old.has_listeners());
        assert_eq!(graph.listeners(c.cpis[0]).unwrap().len(), 1);

        // the other side is no longer observed
        graph.put(c.batiment, "DESIGNATION", "again").unwrap();
        assert_eq!(recorder.values.lock().unwrap().len(), 2);

        assert!(graph.remove_listener(c.cpis[0], &shared).unwrap());
        assert!(!graph.cluster(graph.cluster_of(c.cpis[0]).unwrap()).unwrap().has_listeners());
    }

    #[test]
    fn referent_removal_fires_but_addition_does_not() {
        let mut graph = sample_graph();
        let bat = graph.create("BATIMENT").unwrap();
        let local = graph.create("LOCAL").unwrap();
        let recorder = Arc::new(Recorder::default());
        graph.add_listener(bat, recorder.clone()).unwrap();

        graph.put_link(local, "ID_BATIMENT", bat).unwrap();
        assert!(recorder.referents.lock().unwrap().is_empty());
        {
            let values = recorder.values.lock().unwrap();
            assert_eq!(values.len(), 1);
            assert_eq!(values[0].source, local);
            assert_eq!(values[0].added["ID_BATIMENT"], FieldValue::Link(bat));
        }

        graph.remove_field(local, "ID_BATIMENT").unwrap();
        let referents = recorder.referents.lock().unwrap();
        assert_eq!(
            *referents,
            vec![ReferentChangeEvent {
                target: bat,
                field: "ID_BATIMENT".into(),
                referent: local,
                addition: false,
            }]
        );
        // the value change of `local` happens in the other cluster now
        assert_eq!(recorder.values.lock().unwrap().len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Parent(usize, usize),
        Batiment(usize, usize),
        ClearParent(usize),
        ClearBatiment(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6usize, 0..6usize).prop_map(|(i, j)| Op::Parent(i, j)),
            (0..6usize, 0..2usize).prop_map(|(i, b)| Op::Batiment(i, b)),
            (0..6usize).prop_map(Op::ClearParent),
            (0..6usize).prop_map(Op::ClearBatiment),
        ]
    }

    /// Connected component of `start` computed from node values alone.
    fn component(graph: &RowGraph, all: &[NodeId], start: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::from([start]);
        let mut changed = true;
        while changed {
            changed = false;
            for &n in all {
                for (_, d) in graph.node(n).unwrap().foreigns() {
                    if seen.contains(&n) != seen.contains(&d) {
                        seen.insert(n);
                        seen.insert(d);
                        changed = true;
                    }
                }
            }
        }
        seen
    }

    proptest! {
        #[test]
        fn clusters_are_connected_components(ops in prop::collection::vec(op(), 0..40)) {
            let mut graph = sample_graph();
            let locals: Vec<NodeId> = (0..6).map(|_| graph.create("LOCAL").unwrap()).collect();
            let bats: Vec<NodeId> = (0..2).map(|_| graph.create("BATIMENT").unwrap()).collect();
            let all: Vec<NodeId> = locals.iter().chain(&bats).copied().collect();

            for op in ops {
                match op {
                    Op::Parent(i, j) => graph.put_link(locals[i], "ID_LOCAL_PARENT", locals[j]).unwrap(),
                    Op::Batiment(i, b) => graph.put_link(locals[i], "ID_BATIMENT", bats[b]).unwrap(),
                    Op::ClearParent(i) => { graph.remove_field(locals[i], "ID_LOCAL_PARENT").unwrap(); }
                    Op::ClearBatiment(i) => { graph.remove_field(locals[i], "ID_BATIMENT").unwrap(); }
                }
                let total: usize = graph.clusters.values().map(Cluster::size).sum();
                prop_assert_eq!(total, all.len());
                for &n in &all {
                    let members: HashSet<NodeId> =
                        graph.cluster_members(n).unwrap().into_iter().collect();
                    prop_assert_eq!(&members, &component(&graph, &all, n));
                    prop_assert!(graph.cluster(graph.cluster_of(n).unwrap()).unwrap().contains(n));
                }
            }
        }
    }
}
