//! Completing a graph from the store.
//!
//! [`grow`] makes `target` at least as large as `shape`: every forward path
//! of `shape` that is missing from `target`, or reaches a node lacking some of
//! the shape's fields, is created and filled with the row the store holds for
//! the node at its end. Rows can only be fetched by id, so the first node
//! without one stops the growth.

use std::sync::Arc;

use tracing::debug;

use rowgraph_core::{
    CoreError, Direction, FieldRef, NodeId, Path, RecursionType, RowGraph, Value, Visit,
};

use crate::error::StorageError;
use crate::traits::RowStore;

fn mismatch(reason: String) -> StorageError {
    CoreError::StructuralMismatch { reason }.into()
}

/// Grows `target` into the shape of `shape`, fetching missing rows from
/// `store`.
///
/// With `check_fields`, a node present at a path but missing some of the
/// shape's fields is fetched again. Fetched rows only contribute the fields
/// of the shape node. Fails at the first node to fetch that has no id, or
/// whose row does not exist.
pub fn grow<S: RowStore>(
    graph: &mut RowGraph,
    store: &S,
    shape: NodeId,
    target: NodeId,
    check_fields: bool,
) -> Result<(), StorageError> {
    let (shape_table, target_table) = (graph.node(shape)?.table(), graph.node(target)?.table());
    if shape_table != target_table {
        return Err(CoreError::TableMismatch {
            expected: shape_table.to_string(),
            found: target_table.to_string(),
        }
        .into());
    }

    let mut visits: Vec<(Path, NodeId)> = Vec::new();
    graph.walk(
        shape,
        (),
        |s| {
            visits.push((s.path().clone(), s.current()));
            Visit::Continue(())
        },
        RecursionType::BreadthFirst,
        Direction::Forward,
    )?;

    let schema = Arc::clone(graph.schema());
    for (path, pattern) in visits {
        let wanted: Vec<String> = graph.node(pattern)?.fields().map(str::to_string).collect();
        let complete = match graph.follow_path(target, &path)? {
            None => false,
            Some(existing) => {
                let have = graph.node(existing)?;
                !check_fields || wanted.iter().all(|f| have.contains_field(f))
            }
        };
        if complete {
            continue;
        }

        let leaf = graph.assure_path(target, &path)?;
        let table = graph.node(leaf)?.table().to_string();
        let id = graph.node(leaf)?.id().ok_or_else(|| {
            mismatch(format!("cannot grow, missing id in {table} at {path}"))
        })?;
        let row = store
            .fetch(&table, id)?
            .ok_or_else(|| mismatch(format!("no row {table}[{id}] at {path}")))?;
        debug!(row = %row, path = %path, "growing");

        let mut scalars = Vec::new();
        for field in &wanted {
            if graph.node(leaf)?.foreign(field).is_some() {
                continue;
            }
            let value = row.get(field).cloned().unwrap_or(Value::Null);
            let linked = graph.node(pattern)?.foreign(field).is_some();
            match (linked, value.as_row_id()) {
                (true, Some(fk)) => {
                    let dest = schema.foreign_target(&FieldRef::new(&table, field))?;
                    let pk = schema.table(dest)?.primary_key.clone();
                    let child = graph.create_with(dest, [(pk, Value::Integer(fk.0))])?;
                    graph.put_link(leaf, field, child)?;
                }
                _ => scalars.push((field.clone(), value)),
            }
        }
        graph.load(leaf, scalars)?;
    }
    Ok(())
}
