//! SQLite implementation of [`RowStore`].
//!
//! [`SqliteStore`] keeps one table per schema table (see
//! [`create_tables`](crate::schema::create_tables)) and relies on the engine
//! for NOT NULL and foreign key enforcement. Each commit runs in a single
//! rusqlite transaction, rolled back when dropped uncommitted.

use std::sync::Arc;

use indexmap::IndexMap;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, trace};

use rowgraph_core::{CoreError, FieldDef, FieldType, RowId, Schema, TableDef, Value};

use crate::error::StorageError;
use crate::events::ChangeBus;
use crate::schema::{create_tables, quote, SqliteConfig};
use crate::traits::{RowStore, RowTransaction};
use crate::types::Row;

/// SQLite-backed implementation of [`RowStore`].
pub struct SqliteStore {
    conn: Connection,
    schema: Arc<Schema>,
    bus: ChangeBus,
}

impl SqliteStore {
    /// Opens the configured database and creates the missing tables.
    pub fn open(config: &SqliteConfig, schema: Arc<Schema>) -> Result<Self, StorageError> {
        let conn = config.open()?;
        create_tables(&conn, &schema)?;
        Ok(SqliteStore {
            conn,
            schema,
            bus: ChangeBus::new(),
        })
    }

    /// Opens a private in-memory database (for testing).
    pub fn in_memory(schema: Arc<Schema>) -> Result<Self, StorageError> {
        Self::open(&SqliteConfig::in_memory(), schema)
    }

    pub fn row_count(&self, table: &str) -> Result<i64, StorageError> {
        let def = self.schema.table(table)?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&def.name));
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.conn.path())
            .field("bus", &self.bus)
            .finish()
    }
}

impl RowStore for SqliteStore {
    type Tx<'a> = SqliteTransaction<'a>;

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn transaction(&mut self) -> Result<SqliteTransaction<'_>, StorageError> {
        let tx = self.conn.transaction()?;
        Ok(SqliteTransaction {
            tx,
            schema: &self.schema,
            writes: 0,
        })
    }

    fn fetch(&self, table: &str, id: RowId) -> Result<Option<Row>, StorageError> {
        select_row(&self.conn, self.schema.table(table)?, id)
    }

    fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    fn bus_mut(&mut self) -> &mut ChangeBus {
        &mut self.bus
    }
}

/// A unit of work on a [`SqliteStore`].
pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
    schema: &'a Schema,
    writes: usize,
}

impl SqliteTransaction<'_> {
    fn stored(&self, def: &TableDef, id: RowId) -> Result<Row, StorageError> {
        select_row(&self.tx, def, id)?.ok_or_else(|| StorageError::RowNotFound {
            table: def.name.clone(),
            id,
        })
    }

    fn next_order(&self, def: &TableDef, order: &str) -> Result<f64, StorageError> {
        let sql = format!(
            "SELECT COALESCE(CAST(MAX({}) AS INTEGER), 0) + 1 FROM {}",
            quote(order),
            quote(&def.name)
        );
        let next: i64 = self.tx.query_row(&sql, [], |r| r.get(0))?;
        Ok(next as f64)
    }
}

impl RowTransaction for SqliteTransaction<'_> {
    fn insert(
        &mut self,
        table: &str,
        values: &IndexMap<String, Value>,
        auto_fields: &[String],
    ) -> Result<Row, StorageError> {
        let def = self.schema.table(table)?;
        let is_auto = |name: &str| auto_fields.iter().any(|a| a == name);
        let is_order = |name: &str| def.order_field.as_deref() == Some(name);

        let mut columns = Vec::new();
        let mut params = Vec::new();
        for (name, value) in values {
            def.field(name)?;
            let generated = is_auto(name)
                || (value.is_null() && (is_order(name) || *name == def.primary_key));
            if !generated {
                columns.push(quote(name));
                params.push(to_sql(value));
            }
        }
        if let Some(order) = &def.order_field {
            if !columns.contains(&quote(order)) {
                columns.push(quote(order));
                params.push(SqlValue::Real(self.next_order(def, order)?));
            }
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(&def.name))
        } else {
            let slots: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&def.name),
                columns.join(", "),
                slots.join(", ")
            )
        };
        self.tx.execute(&sql, params_from_iter(params))?;
        let id = RowId(self.tx.last_insert_rowid());
        self.writes += 1;
        trace!(table, id = id.0, "insert");
        self.stored(def, id)
    }

    fn update(
        &mut self,
        table: &str,
        id: RowId,
        values: &IndexMap<String, Value>,
    ) -> Result<Row, StorageError> {
        let def = self.schema.table(table)?;
        let mut sets = Vec::new();
        let mut params = Vec::new();
        for (name, value) in values {
            def.field(name)?;
            if *name == def.primary_key {
                if value.as_integer() != Some(id.0) {
                    return Err(CoreError::Validation {
                        table: def.name.clone(),
                        reason: format!("primary key of {table}[{id}] cannot become {value}"),
                    }
                    .into());
                }
                continue;
            }
            params.push(to_sql(value));
            sets.push(format!("{} = ?{}", quote(name), params.len()));
        }
        if !sets.is_empty() {
            params.push(SqlValue::Integer(id.0));
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?{}",
                quote(&def.name),
                sets.join(", "),
                quote(&def.primary_key),
                params.len()
            );
            let changed = self.tx.execute(&sql, params_from_iter(params))?;
            if changed == 0 {
                return Err(StorageError::RowNotFound {
                    table: def.name.clone(),
                    id,
                });
            }
            self.writes += 1;
        }
        trace!(table, id = id.0, fields = sets.len(), "update");
        self.stored(def, id)
    }

    fn delete(&mut self, table: &str, id: RowId) -> Result<Row, StorageError> {
        let def = self.schema.table(table)?;
        let row = self.stored(def, id)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(&def.name),
            quote(&def.primary_key)
        );
        self.tx.execute(&sql, params![id.0])?;
        self.writes += 1;
        trace!(table, id = id.0, "delete");
        Ok(row)
    }

    fn commit(self) -> Result<(), StorageError> {
        let writes = self.writes;
        self.tx.commit()?;
        debug!(writes, "transaction committed");
        Ok(())
    }
}

fn select_row(conn: &Connection, def: &TableDef, id: RowId) -> Result<Option<Row>, StorageError> {
    let columns: Vec<String> = def.fields.keys().map(|f| quote(f)).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        columns.join(", "),
        quote(&def.name),
        quote(&def.primary_key)
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let raw: Option<Vec<SqlValue>> = stmt
        .query_row(params![id.0], |r| {
            (0..columns.len()).map(|i| r.get::<_, SqlValue>(i)).collect()
        })
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut values = IndexMap::with_capacity(raw.len());
    for (field, value) in def.fields.values().zip(raw) {
        values.insert(field.name.clone(), from_sql(def, field, ValueRef::from(&value))?);
    }
    Ok(Some(Row {
        table: def.name.clone(),
        id,
        values,
    }))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(t) => SqlValue::Text(t.clone()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
    }
}

fn from_sql(def: &TableDef, field: &FieldDef, value: ValueRef<'_>) -> Result<Value, StorageError> {
    let decoded = match (field.ty, value) {
        (_, ValueRef::Null) => Value::Null,
        (FieldType::Integer, ValueRef::Integer(i)) => Value::Integer(i),
        (FieldType::Real, ValueRef::Real(r)) => Value::Real(r),
        (FieldType::Real, ValueRef::Integer(i)) => Value::Real(i as f64),
        (FieldType::Boolean, ValueRef::Integer(i)) => Value::Boolean(i != 0),
        (FieldType::Text, ValueRef::Text(bytes)) => Value::Text(
            String::from_utf8(bytes.to_vec()).map_err(|e| StorageError::Decode {
                table: def.name.clone(),
                field: field.name.clone(),
                reason: e.to_string(),
            })?,
        ),
        (ty, other) => {
            return Err(StorageError::Decode {
                table: def.name.clone(),
                field: field.name.clone(),
                reason: format!("{:?} column holds {:?}", ty, other.data_type()),
            })
        }
    };
    Ok(decoded)
}
