//! In-memory implementation of [`RowStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and anywhere
//! persistence isn't needed. It keeps the constraints the SQLite backend
//! gets from its engine: generated keys and order values, NOT NULL and
//! immediate foreign key checks, restricted deletes. Per-table triggers run
//! before each insert or update and may rewrite the row or refuse it, which
//! is how store-side rewrites are exercised in tests.
//!
//! A transaction works on a copy of every table taken when it begins;
//! committing swaps the copy in, dropping it discards it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use rowgraph_core::{CoreError, RowId, Schema, TableDef, Value};

use crate::error::StorageError;
use crate::events::ChangeBus;
use crate::traits::{RowStore, RowTransaction};
use crate::types::Row;

/// A store-side hook run on the full row before it is written.
pub type Trigger = Arc<dyn Fn(&mut IndexMap<String, Value>) -> Result<(), String> + Send + Sync>;

/// Rows per table, keyed by primary key.
#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, BTreeMap<i64, IndexMap<String, Value>>>,
}

impl Tables {
    fn table(&self, name: &str) -> Option<&BTreeMap<i64, IndexMap<String, Value>>> {
        self.rows.get(name)
    }

    fn contains(&self, table: &str, id: i64) -> bool {
        self.table(table).is_some_and(|t| t.contains_key(&id))
    }

    fn next_id(&self, table: &str) -> i64 {
        self.table(table)
            .and_then(|t| t.keys().next_back())
            .map_or(1, |max| max + 1)
    }

    fn next_order(&self, table: &str, order: &str) -> f64 {
        let max = self
            .table(table)
            .into_iter()
            .flat_map(|t| t.values())
            .filter_map(|row| match row.get(order) {
                Some(Value::Real(r)) => Some(*r),
                Some(Value::Integer(i)) => Some(*i as f64),
                _ => None,
            })
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        max.map_or(1.0, |m| m.floor() + 1.0)
    }
}

/// In-memory implementation of [`RowStore`].
pub struct InMemoryStore {
    schema: Arc<Schema>,
    data: Tables,
    triggers: IndexMap<String, Vec<Trigger>>,
    bus: ChangeBus,
    commits: usize,
}

impl InMemoryStore {
    /// Creates an empty store with one empty table per schema table.
    pub fn new(schema: Arc<Schema>) -> Self {
        let mut data = Tables::default();
        for t in schema.tables() {
            data.rows.insert(t.name.clone(), BTreeMap::new());
        }
        InMemoryStore {
            schema,
            data,
            triggers: IndexMap::new(),
            bus: ChangeBus::new(),
            commits: 0,
        }
    }

    /// Registers a trigger run before every insert and update of `table`.
    pub fn add_trigger<F>(&mut self, table: &str, trigger: F)
    where
        F: Fn(&mut IndexMap<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.triggers
            .entry(table.to_string())
            .or_default()
            .push(Arc::new(trigger));
    }

    /// All committed rows of `table`, by increasing key.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.data
            .table(table)
            .into_iter()
            .flat_map(|t| t.iter())
            .map(|(&id, values)| Row {
                table: table.to_string(),
                id: RowId(id),
                values: values.clone(),
            })
            .collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.data.table(table).map_or(0, BTreeMap::len)
    }

    /// Number of transactions committed so far.
    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("data", &self.data)
            .field("triggers", &self.triggers.keys().collect::<Vec<_>>())
            .field("bus", &self.bus)
            .field("commits", &self.commits)
            .finish()
    }
}

impl RowStore for InMemoryStore {
    type Tx<'a> = MemoryTransaction<'a>;

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn transaction(&mut self) -> Result<MemoryTransaction<'_>, StorageError> {
        let work = self.data.clone();
        Ok(MemoryTransaction {
            store: self,
            work,
            writes: 0,
            committed: false,
        })
    }

    fn fetch(&self, table: &str, id: RowId) -> Result<Option<Row>, StorageError> {
        self.schema.table(table)?;
        Ok(self
            .data
            .table(table)
            .and_then(|t| t.get(&id.0))
            .map(|values| Row {
                table: table.to_string(),
                id,
                values: values.clone(),
            }))
    }

    fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    fn bus_mut(&mut self) -> &mut ChangeBus {
        &mut self.bus
    }
}

/// A unit of work on an [`InMemoryStore`].
pub struct MemoryTransaction<'a> {
    store: &'a mut InMemoryStore,
    work: Tables,
    writes: usize,
    committed: bool,
}

impl MemoryTransaction<'_> {
    fn run_triggers(&self, table: &str, row: &mut IndexMap<String, Value>) -> Result<(), StorageError> {
        for trigger in self.store.triggers.get(table).into_iter().flatten() {
            trigger(row).map_err(|reason| StorageError::Trigger {
                table: table.to_string(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Type, NOT NULL and foreign key checks of a complete row.
    fn check(&self, def: &TableDef, id: i64, row: &IndexMap<String, Value>) -> Result<(), StorageError> {
        for (name, field) in &def.fields {
            let value = match row.get(name) {
                Some(v) if !v.is_null() => v,
                _ if field.nullable => continue,
                _ => {
                    return Err(StorageError::NotNull {
                        table: def.name.clone(),
                        field: name.clone(),
                    })
                }
            };
            if !field.ty.accepts(value) {
                return Err(CoreError::Validation {
                    table: def.name.clone(),
                    reason: format!("'{name}' expects {:?}, got {value}", field.ty),
                }
                .into());
            }
            if let Some(target) = &field.foreign_table {
                let fk = value.as_integer().ok_or_else(|| StorageError::ForeignKey {
                    table: def.name.clone(),
                    field: name.clone(),
                    reason: format!("{value} is not a key"),
                })?;
                let self_ref = *target == def.name && fk == id;
                if !self_ref && !self.work.contains(target, fk) {
                    return Err(StorageError::ForeignKey {
                        table: def.name.clone(),
                        field: name.clone(),
                        reason: format!("no row {target}[{fk}]"),
                    });
                }
            }
        }
        Ok(())
    }

    fn put(&mut self, table: &str, id: i64, row: IndexMap<String, Value>) -> Row {
        self.writes += 1;
        self.work
            .rows
            .entry(table.to_string())
            .or_default()
            .insert(id, row.clone());
        Row {
            table: table.to_string(),
            id: RowId(id),
            values: row,
        }
    }
}

impl RowTransaction for MemoryTransaction<'_> {
    fn insert(
        &mut self,
        table: &str,
        values: &IndexMap<String, Value>,
        auto_fields: &[String],
    ) -> Result<Row, StorageError> {
        let schema = Arc::clone(&self.store.schema);
        let def = schema.table(table)?;
        for name in values.keys() {
            def.field(name)?;
        }
        let is_auto = |name: &str| auto_fields.iter().any(|a| a == name);

        let given = |name: &str| values.get(name).filter(|v| !v.is_null());
        let id = match given(&def.primary_key) {
            Some(v) if !is_auto(&def.primary_key) => v.as_integer().ok_or_else(|| {
                StorageError::Core(CoreError::Validation {
                    table: def.name.clone(),
                    reason: format!("primary key {v} is not an integer"),
                })
            })?,
            _ => self.work.next_id(table),
        };
        if self.work.contains(table, id) {
            return Err(StorageError::DuplicateKey {
                table: def.name.clone(),
                id: RowId(id),
            });
        }

        let mut row = IndexMap::with_capacity(def.fields.len());
        for (name, field) in &def.fields {
            let value = if *name == def.primary_key {
                Value::Integer(id)
            } else if def.order_field.as_deref() == Some(name.as_str())
                && (is_auto(name) || given(name).is_none())
            {
                Value::Real(self.work.next_order(table, name))
            } else if let Some(v) = values.get(name) {
                v.clone()
            } else {
                field.default.clone().unwrap_or(Value::Null)
            };
            row.insert(name.clone(), value);
        }
        self.run_triggers(table, &mut row)?;
        row.insert(def.primary_key.clone(), Value::Integer(id));
        self.check(def, id, &row)?;

        trace!(table, id, "insert");
        Ok(self.put(table, id, row))
    }

    fn update(
        &mut self,
        table: &str,
        id: RowId,
        values: &IndexMap<String, Value>,
    ) -> Result<Row, StorageError> {
        let schema = Arc::clone(&self.store.schema);
        let def = schema.table(table)?;
        let mut row = self
            .work
            .table(table)
            .and_then(|t| t.get(&id.0))
            .cloned()
            .ok_or_else(|| StorageError::RowNotFound {
                table: table.to_string(),
                id,
            })?;
        for (name, value) in values {
            def.field(name)?;
            if *name == def.primary_key && value.as_integer() != Some(id.0) {
                return Err(CoreError::Validation {
                    table: def.name.clone(),
                    reason: format!("primary key of {table}[{id}] cannot become {value}"),
                }
                .into());
            }
            row.insert(name.clone(), value.clone());
        }
        self.run_triggers(table, &mut row)?;
        row.insert(def.primary_key.clone(), Value::Integer(id.0));
        self.check(def, id.0, &row)?;

        trace!(table, id = id.0, fields = values.len(), "update");
        Ok(self.put(table, id.0, row))
    }

    fn delete(&mut self, table: &str, id: RowId) -> Result<Row, StorageError> {
        let schema = Arc::clone(&self.store.schema);
        schema.table(table)?;
        for referencing in schema.referencing_fields(table) {
            let used = self
                .work
                .table(&referencing.table)
                .into_iter()
                .flat_map(|t| t.iter())
                .any(|(&other, row)| {
                    row.get(&referencing.name).and_then(Value::as_integer) == Some(id.0)
                        && !(referencing.table == table && other == id.0)
                });
            if used {
                return Err(StorageError::ForeignKey {
                    table: referencing.table.clone(),
                    field: referencing.name.clone(),
                    reason: format!("{table}[{id}] is still referenced"),
                });
            }
        }
        let values = self
            .work
            .rows
            .get_mut(table)
            .and_then(|t| t.remove(&id.0))
            .ok_or_else(|| StorageError::RowNotFound {
                table: table.to_string(),
                id,
            })?;
        self.writes += 1;
        trace!(table, id = id.0, "delete");
        Ok(Row {
            table: table.to_string(),
            id,
            values,
        })
    }

    fn commit(mut self) -> Result<(), StorageError> {
        self.store.data = std::mem::take(&mut self.work);
        self.store.commits += 1;
        self.committed = true;
        debug!(writes = self.writes, "transaction committed");
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && self.writes > 0 {
            debug!(writes = self.writes, "transaction rolled back");
        }
    }
}
