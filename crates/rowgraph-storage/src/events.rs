//! Table-level change notification.
//!
//! Listeners subscribe to a table and receive every committed
//! [`TableEvent`] of that table, in the order the writes completed. Events
//! are only published once the unit of work has committed.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::types::TableEvent;

/// Receives the committed modifications of a table.
pub trait TableListener: Send + Sync {
    fn table_modified(&self, event: &TableEvent);
}

impl<F> TableListener for F
where
    F: Fn(&TableEvent) + Send + Sync,
{
    fn table_modified(&self, event: &TableEvent) {
        self(event)
    }
}

/// Subscribers per table, in subscription order.
#[derive(Default, Clone)]
pub struct ChangeBus {
    listeners: IndexMap<String, Vec<Arc<dyn TableListener>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, table: &str, listener: Arc<dyn TableListener>) {
        self.listeners
            .entry(table.to_string())
            .or_default()
            .push(listener);
    }

    /// Unsubscribes `listener` (compared by identity). Returns whether it
    /// was subscribed.
    pub fn remove_listener(&mut self, table: &str, listener: &Arc<dyn TableListener>) -> bool {
        let Some(list) = self.listeners.get_mut(table) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !Arc::ptr_eq(l, listener));
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.shift_remove(table);
        }
        removed
    }

    pub fn listener_count(&self, table: &str) -> usize {
        self.listeners.get(table).map_or(0, Vec::len)
    }

    /// Delivers `event` to the listeners of its table.
    pub fn fire(&self, event: &TableEvent) {
        let Some(list) = self.listeners.get(&event.table) else {
            return;
        };
        trace!(table = %event.table, id = %event.id, kind = %event.kind, "firing table event");
        for l in list {
            l.table_modified(event);
        }
    }
}

impl fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.listeners.iter().map(|(t, l)| (t, l.len())))
            .finish()
    }
}
