//! Connection setup and table creation for the SQLite backend.
//!
//! Tables are generated from the [`Schema`] the graph is built on: an
//! `INTEGER PRIMARY KEY` per table, one column per field with its NOT NULL
//! and DEFAULT clauses, and a `REFERENCES` clause per foreign key.

use std::path::PathBuf;

use rusqlite::Connection;
use tracing::debug;

use rowgraph_core::{FieldDef, FieldType, Schema, TableDef, Value};

use crate::error::StorageError;

/// Environment variable holding the database path.
pub const DB_PATH_VAR: &str = "ROWGRAPH_DB_PATH";
/// Environment variable overriding the journal mode.
pub const JOURNAL_MODE_VAR: &str = "ROWGRAPH_JOURNAL_MODE";

const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

/// Where and how to open the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Database file, `None` for a private in-memory database.
    pub path: Option<PathBuf>,
    pub journal_mode: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfig {
            path: None,
            journal_mode: "WAL".to_string(),
        }
    }
}

impl SqliteConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        SqliteConfig {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Reads `ROWGRAPH_DB_PATH` and `ROWGRAPH_JOURNAL_MODE`, falling back to
    /// the defaults for unset variables.
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StorageError> {
        let mut config = SqliteConfig::default();
        if let Some(path) = lookup(DB_PATH_VAR).filter(|p| !p.is_empty()) {
            config.path = Some(PathBuf::from(path));
        }
        if let Some(mode) = lookup(JOURNAL_MODE_VAR) {
            let mode = mode.to_ascii_uppercase();
            if !JOURNAL_MODES.contains(&mode.as_str()) {
                return Err(StorageError::Config {
                    reason: format!("unknown journal mode '{mode}'"),
                });
            }
            config.journal_mode = mode;
        }
        Ok(config)
    }

    /// Opens the database and applies the connection pragmas.
    pub fn open(&self) -> Result<Connection, StorageError> {
        let conn = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        configure(&conn, &self.journal_mode)?;
        Ok(conn)
    }
}

/// Sets the journal mode and turns foreign key enforcement on.
fn configure(conn: &Connection, journal_mode: &str) -> Result<(), StorageError> {
    // in-memory databases silently keep the "memory" journal
    conn.pragma_update(None, "journal_mode", journal_mode)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // off by default in SQLite
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Creates every table of `schema` that does not exist yet.
pub fn create_tables(conn: &Connection, schema: &Schema) -> Result<(), StorageError> {
    let ddl: Vec<String> = schema.tables().map(table_ddl).collect();
    conn.execute_batch(&ddl.join("\n"))?;
    debug!(tables = ddl.len(), "tables created");
    Ok(())
}

pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_ddl(table: &TableDef) -> String {
    let columns: Vec<String> = table
        .fields
        .values()
        .map(|f| column_ddl(table, f))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        quote(&table.name),
        columns.join(", ")
    )
}

fn column_ddl(table: &TableDef, field: &FieldDef) -> String {
    if field.name == table.primary_key {
        return format!("{} INTEGER PRIMARY KEY", quote(&field.name));
    }
    let ty = match field.ty {
        FieldType::Integer | FieldType::Boolean => "INTEGER",
        FieldType::Real => "REAL",
        FieldType::Text => "TEXT",
    };
    let mut col = format!("{} {ty}", quote(&field.name));
    if !field.nullable {
        col.push_str(" NOT NULL");
    }
    if let Some(default) = &field.default {
        col.push_str(" DEFAULT ");
        col.push_str(&literal(default));
    }
    if let Some(target) = &field.foreign_table {
        col.push_str(&format!(" REFERENCES {}", quote(target)));
    }
    col
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => format!("{r:?}"),
        Value::Text(t) => format!("'{}'", t.replace('\'', "''")),
        Value::Boolean(b) => u8::from(*b).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn local() -> TableDef {
        TableDef::new("LOCAL", "ID")
            .with_field(FieldDef::new("DESIGNATION", FieldType::Text).with_default("l'a"))
            .with_field(FieldDef::foreign("ID_BATIMENT", "BATIMENT"))
            .with_order_field("ORDRE")
    }

    #[test]
    fn ddl_follows_field_declarations() {
        assert_eq!(
            table_ddl(&local()),
            "CREATE TABLE IF NOT EXISTS \"LOCAL\" (\"ID\" INTEGER PRIMARY KEY, \
             \"DESIGNATION\" TEXT DEFAULT 'l''a', \
             \"ID_BATIMENT\" INTEGER REFERENCES \"BATIMENT\", \
             \"ORDRE\" REAL NOT NULL);"
        );
    }

    #[test]
    fn config_reads_the_environment() {
        let vars: HashMap<&str, &str> =
            [(DB_PATH_VAR, "/tmp/rows.db"), (JOURNAL_MODE_VAR, "delete")].into();
        let config = SqliteConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.path, Some(PathBuf::from("/tmp/rows.db")));
        assert_eq!(config.journal_mode, "DELETE");

        let config = SqliteConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, SqliteConfig::in_memory());

        let err = SqliteConfig::from_lookup(|k| (k == JOURNAL_MODE_VAR).then(|| "fast".into()))
            .unwrap_err();
        assert!(matches!(err, StorageError::Config { .. }));
    }

    #[test]
    fn tables_are_created_once() {
        let conn = SqliteConfig::in_memory().open().unwrap();
        let schema = Schema::new()
            .with_table(TableDef::new("BATIMENT", "ID"))
            .with_table(local());
        create_tables(&conn, &schema).unwrap();
        create_tables(&conn, &schema).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
