//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rowgraph_core::{FieldDef, FieldType, NodeId, RowGraph, Schema, TableDef};
use rowgraph_storage::{RowStore, TableEvent};

/// Sites and contacts refer to each other; rooms hang off buildings and may
/// have a parent room.
pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new()
            .with_table(
                TableDef::new("SITE", "ID")
                    .with_field(FieldDef::new("NOM", FieldType::Text))
                    .with_field(FieldDef::foreign("ID_CONTACT_RAPPORT", "CONTACT"))
                    .with_field(FieldDef::foreign("ID_CONTACT_UTILE", "CONTACT")),
            )
            .with_table(
                TableDef::new("CONTACT", "ID")
                    .with_field(FieldDef::new("NOM", FieldType::Text).not_null())
                    .with_field(FieldDef::foreign("ID_SITE", "SITE")),
            )
            .with_table(
                TableDef::new("BATIMENT", "ID")
                    .with_field(FieldDef::new("DESIGNATION", FieldType::Text))
                    .with_field(FieldDef::foreign("ID_SITE", "SITE")),
            )
            .with_table(
                TableDef::new("LOCAL", "ID")
                    .with_field(FieldDef::new("DESIGNATION", FieldType::Text))
                    .with_field(FieldDef::foreign("ID_BATIMENT", "BATIMENT"))
                    .with_field(FieldDef::foreign("ID_LOCAL_PARENT", "LOCAL"))
                    .with_order_field("ORDRE"),
            ),
    )
}

pub fn graph() -> RowGraph {
    RowGraph::new(schema())
}

pub fn named(graph: &mut RowGraph, table: &str, name: &str) -> NodeId {
    let field = match table {
        "SITE" | "CONTACT" => "NOM",
        _ => "DESIGNATION",
    };
    graph.create_with(table, [(field, name)]).unwrap()
}

/// Subscribes to `tables` and returns everything they receive, in order.
pub fn record<S: RowStore>(store: &mut S, tables: &[&str]) -> Arc<Mutex<Vec<TableEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for table in tables {
        let sink = Arc::clone(&seen);
        store.bus_mut().add_listener(
            table,
            Arc::new(move |e: &TableEvent| sink.lock().unwrap().push(e.clone())),
        );
    }
    seen
}
