//! Shared fixtures for the unit tests of this crate.

use std::sync::Arc;

use crate::graph::RowGraph;
use crate::id::NodeId;
use crate::schema::{FieldDef, FieldType, Schema, TableDef};

/// Sites with contacts (a foreign key cycle), buildings, rooms and
/// fire-safety equipment hanging off rooms.
pub fn sample_schema() -> Schema {
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
        )
        .with_table(
            TableDef::new("CPI_BT", "ID")
                .with_field(FieldDef::new("DESIGNATION", FieldType::Text))
                .with_field(FieldDef::foreign("ID_LOCAL", "LOCAL")),
        )
}

pub fn sample_graph() -> RowGraph {
    RowGraph::new(Arc::new(sample_schema()))
}

/// Creates a node of `table` with a `DESIGNATION` (or `NOM`) value.
pub fn named(graph: &mut RowGraph, table: &str, name: &str) -> NodeId {
    let node = graph.create(table).unwrap();
    let field = match table {
        "SITE" | "CONTACT" => "NOM",
        _ => "DESIGNATION",
    };
    graph.put(node, field, name).unwrap();
    node
}

/// A building with three rooms, the first and last of which hold equipment:
/// `BATIMENT <- LOCAL(a) <- CPI_BT(a1), CPI_BT(a2)`, `LOCAL(b)`,
/// `LOCAL(c) <- CPI_BT(c1)`.
pub struct Campus {
    pub batiment: NodeId,
    pub locals: [NodeId; 3],
    pub cpis: [NodeId; 3],
}

pub fn campus(graph: &mut RowGraph) -> Campus {
    let batiment = named(graph, "BATIMENT", "bat");
    let a = named(graph, "LOCAL", "a");
    let b = named(graph, "LOCAL", "b");
    let c = named(graph, "LOCAL", "c");
    for l in [a, b, c] {
        graph.put_link(l, "ID_BATIMENT", batiment).unwrap();
    }
    let a1 = named(graph, "CPI_BT", "a1");
    let a2 = named(graph, "CPI_BT", "a2");
    let c1 = named(graph, "CPI_BT", "c1");
    graph.put_link(a1, "ID_LOCAL", a).unwrap();
    graph.put_link(a2, "ID_LOCAL", a).unwrap();
    graph.put_link(c1, "ID_LOCAL", c).unwrap();
    Campus {
        batiment,
        locals: [a, b, c],
        cpis: [a1, a2, c1],
    }
}
