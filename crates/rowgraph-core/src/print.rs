//! Tree rendering of a node and its referents.
//!
//! ```text
//! BATIMENT[2]  LOCAL[5]     CPI_BT[5]
//!              LOCAL[3]
//!              LOCAL[2]     CPI_BT[3]
//!                           CPI_BT[2]
//! ```
//!
//! The column of a node is its depth; its row is allocated when the node is
//! first reached, except that a node sits on the row of its first descendant
//! so that each parent lines up with its first child.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::graph::RowGraph;
use crate::id::NodeId;
use crate::walk::{Direction, RecursionType, Visit};

/// A sparse grid of nodes.
#[derive(Debug, Default)]
struct Matrix {
    cells: HashMap<(usize, usize), NodeId>,
    width: usize,
    height: usize,
}

impl Matrix {
    fn put(&mut self, x: usize, y: usize, node: NodeId) {
        self.cells.insert((x, y), node);
        self.width = self.width.max(x + 1);
        self.height = self.height.max(y + 1);
    }

    /// One line per row, every cell cut or padded to `cell_len` characters,
    /// trailing blanks removed.
    fn print(&self, cell_len: usize, label: impl Fn(NodeId) -> String) -> String {
        let mut out = String::new();
        for y in 0..self.height {
            let mut line = String::new();
            for x in 0..self.width {
                let text = self.cells.get(&(x, y)).map(|&n| label(n)).unwrap_or_default();
                let cell: String = text.chars().take(cell_len).collect();
                let pad = cell_len - cell.chars().count();
                line.push_str(&cell);
                line.extend(std::iter::repeat(' ').take(pad));
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

impl RowGraph {
    /// Renders `root` and everything referring to it, transitively.
    ///
    /// Cells show `TABLE[id]` for rows with an id and `TABLE` otherwise.
    pub fn print_tree(&self, root: NodeId, cell_len: usize) -> Result<String, CoreError> {
        let mut ys: HashMap<NodeId, usize> = HashMap::new();
        let mut next_y = 0;
        let mut matrix = Matrix::default();
        let mut failure = None;
        self.walk(
            root,
            (),
            |s| {
                let current = s.current();
                let y = match ys.get(&current) {
                    Some(&y) => y,
                    None => {
                        next_y += 1;
                        next_y - 1
                    }
                };
                matrix.put(s.path().length(), y, current);

                // claim this row for every ancestor not placed yet
                if let Some(ancestor) = s.previous() {
                    let res = self.walk(
                        ancestor,
                        (),
                        |up| {
                            if ys.contains_key(&up.current()) {
                                return Visit::StopAll(None);
                            }
                            ys.insert(up.current(), y);
                            Visit::Continue(())
                        },
                        RecursionType::BreadthFirst,
                        Direction::Forward,
                    );
                    if let Err(e) = res {
                        failure = Some(e);
                        return Visit::StopAll(None);
                    }
                }
                Visit::Continue(())
            },
            RecursionType::DepthFirst,
            Direction::Backward,
        )?;
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(matrix.print(cell_len, |n| self.label(n)))
    }
}
