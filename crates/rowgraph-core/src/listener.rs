//! Change notifications for row-value nodes.
//!
//! Listeners are registered on a node but observe every node of the cluster
//! that node currently belongs to; their registrations follow the node when
//! clusters merge or split.
//!
//! Referents are reported asymmetrically: a new referent is only visible
//! through the value change of the node that now points here, whereas a lost
//! referent is reported to the pointed-to side with a [`ReferentChangeEvent`]
//! because, after a split, the two sides may no longer share listeners.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::id::NodeId;
use crate::value::FieldValue;

/// Fields of `source` were set or cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChangeEvent {
    pub source: NodeId,
    /// New values, in the order they were set.
    pub added: IndexMap<String, FieldValue>,
    /// Fields cleared from `source`.
    pub removed: Vec<String>,
}

impl ValueChangeEvent {
    /// Names of every field touched by this change.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.added
            .keys()
            .map(String::as_str)
            .chain(self.removed.iter().map(String::as_str))
    }
}

/// `referent` started or stopped pointing at `target` through `field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferentChangeEvent {
    pub target: NodeId,
    pub field: String,
    pub referent: NodeId,
    pub addition: bool,
}

/// Subscriber to node changes.
///
/// Called synchronously while the graph is being mutated; implementations
/// must be quick and must not try to mutate the graph they observe.
pub trait ValueChangeListener: Send + Sync {
    fn value_change(&self, event: &ValueChangeEvent);

    fn referent_change(&self, _event: &ReferentChangeEvent) {}
}

/// Registered listeners are shared handles; removal is by handle identity.
pub type SharedListener = Arc<dyn ValueChangeListener>;

/// Per-node listener lists of one cluster.
#[derive(Clone, Default)]
pub(crate) struct ListenerMap {
    by_node: IndexMap<NodeId, Vec<SharedListener>>,
}

impl ListenerMap {
    pub(crate) fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    pub(crate) fn add(&mut self, node: NodeId, listener: SharedListener) {
        self.by_node.entry(node).or_default().push(listener);
    }

    /// Removes one registration of `listener` on `node`, dropping the list
    /// once empty.
    pub(crate) fn remove(&mut self, node: NodeId, listener: &SharedListener) -> bool {
        let Some(list) = self.by_node.get_mut(&node) else {
            return false;
        };
        let Some(pos) = list.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.by_node.shift_remove(&node);
        }
        true
    }

    /// Moves the registrations of `node` out of this map.
    pub(crate) fn take(&mut self, node: NodeId) -> Option<Vec<SharedListener>> {
        self.by_node.shift_remove(&node)
    }

    pub(crate) fn extend(&mut self, other: ListenerMap) {
        for (node, list) in other.by_node {
            self.by_node.entry(node).or_default().extend(list);
        }
    }

    pub(crate) fn registered_on(&self, node: NodeId) -> &[SharedListener] {
        self.by_node.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn all(&self) -> Vec<SharedListener> {
        self.by_node.values().flatten().cloned().collect()
    }
}

impl fmt::Debug for ListenerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_node.iter().map(|(n, l)| (n, l.len())))
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every event it receives.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub values: Mutex<Vec<ValueChangeEvent>>,
        pub referents: Mutex<Vec<ReferentChangeEvent>>,
    }

    impl ValueChangeListener for Recorder {
        fn value_change(&self, event: &ValueChangeEvent) {
            self.values.lock().unwrap().push(event.clone());
        }

        fn referent_change(&self, event: &ReferentChangeEvent) {
            self.referents.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn map_drops_empty_lists() {
        let mut map = ListenerMap::default();
        let a: SharedListener = Arc::new(Recorder::default());
        let b: SharedListener = Arc::new(Recorder::default());
        map.add(NodeId(1), a.clone());
        assert!(!map.remove(NodeId(1), &b));
        assert!(map.remove(NodeId(1), &a));
        assert!(map.is_empty());
        assert!(!map.remove(NodeId(1), &a));
    }

    #[test]
    fn extend_appends_to_existing_lists() {
        let mut left = ListenerMap::default();
        let mut right = ListenerMap::default();
        let a: SharedListener = Arc::new(Recorder::default());
        left.add(NodeId(1), a.clone());
        right.add(NodeId(1), a.clone());
        right.add(NodeId(2), a);
        left.extend(right);
        assert_eq!(left.registered_on(NodeId(1)).len(), 2);
        assert_eq!(left.all().len(), 3);
        assert_eq!(left.take(NodeId(2)).map(|l| l.len()), Some(1));
    }

    #[test]
    fn event_fields_lists_added_then_removed() {
        let mut added = IndexMap::new();
        added.insert("NOM".to_string(), FieldValue::Scalar("x".into()));
        let event = ValueChangeEvent {
            source: NodeId(0),
            added,
            removed: vec!["ID_SITE".into()],
        };
        assert_eq!(event.fields().collect::<Vec<_>>(), vec!["NOM", "ID_SITE"]);
    }
}
