//! Steps and paths: named traversals across tables through foreign keys.
//!
//! A [`Step`] crosses from one table to another through one or more foreign
//! key fields, each tagged forward (following the key) or backward (following
//! referents). A [`Path`] is an immutable, contiguous sequence of steps;
//! composition (`add`, `append`, `sub_path`, `reverse`) always produces a new
//! path.
//!
//! Two paths are equal iff they start from the same table and have the same
//! ordered steps. The intermediate tables are not compared: starting from the
//! same point, the same steps lead to the same tables.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::schema::{FieldRef, Schema};

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One traversal between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    from: String,
    to: String,
    /// Each field crossed, `true` when crossed in the key's own direction.
    fields: BTreeMap<FieldRef, bool>,
}

impl Step {
    /// A step through a single field whose ends are already known.
    pub(crate) fn single(from: &str, to: &str, field: FieldRef, forward: bool) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field, forward);
        Step {
            from: from.to_string(),
            to: to.to_string(),
            fields,
        }
    }

    /// Creates a step leaving `from` through `field`.
    ///
    /// `direction` is `Some(true)` to cross from the field's table to the
    /// table it references, `Some(false)` for the reverse, `None` to infer it.
    /// Fails if `field` is not a foreign key, touches neither end, or is a
    /// self-reference with no explicit direction.
    pub fn create(
        schema: &Schema,
        from: &str,
        field: &FieldRef,
        direction: Option<bool>,
    ) -> Result<Step, CoreError> {
        schema.table(from)?;
        let target = schema.foreign_target(field)?;
        let owner = field.table.as_str();
        let invalid = |reason: &str| CoreError::InvalidStep {
            from: from.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        };
        let forward = match direction {
            Some(true) if owner == from => true,
            Some(true) => return Err(invalid("field does not belong to the start table")),
            Some(false) if target == from => false,
            Some(false) => return Err(invalid("field does not reference the start table")),
            None if owner == from && target == from => {
                return Err(CoreError::AmbiguousStep {
                    from: from.to_string(),
                    to: from.to_string(),
                    reason: format!("self-reference {field} needs an explicit direction"),
                })
            }
            None if owner == from => true,
            None if target == from => false,
            None => return Err(invalid("field touches neither end")),
        };
        let to = if forward { target } else { owner };
        Ok(Step::single(from, to, field.clone(), forward))
    }

    /// Creates a step made of every foreign key between `from` and `to`.
    ///
    /// The result may bind several fields (see [`Step::single_field`]).
    pub fn between(schema: &Schema, from: &str, to: &str) -> Result<Step, CoreError> {
        if from == to {
            return Err(CoreError::AmbiguousStep {
                from: from.to_string(),
                to: to.to_string(),
                reason: "self-references need an explicit field and direction".to_string(),
            });
        }
        let found = schema.foreign_fields_between(from, to)?;
        if found.is_empty() {
            return Err(CoreError::InvalidStep {
                from: from.to_string(),
                field: to.to_string(),
                reason: "no foreign key between the tables".to_string(),
            });
        }
        Ok(Step {
            from: from.to_string(),
            to: to.to_string(),
            fields: found.into_iter().collect(),
        })
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn fields(&self) -> &BTreeMap<FieldRef, bool> {
        &self.fields
    }

    /// The only field of this step, `None` if it binds several.
    pub fn single_field(&self) -> Option<&FieldRef> {
        if self.fields.len() == 1 {
            self.fields.keys().next()
        } else {
            None
        }
    }

    /// `Some(true)` if every field is crossed forward, `Some(false)` if every
    /// field is crossed backward, `None` when mixed.
    pub fn is_foreign(&self) -> Option<bool> {
        let mut dirs = self.fields.values();
        let first = *dirs.next()?;
        dirs.all(|&d| d == first).then_some(first)
    }

    /// The same fields crossed the other way.
    pub fn reverse(&self) -> Step {
        Step {
            from: self.to.clone(),
            to: self.from.clone(),
            fields: self.fields.iter().map(|(f, d)| (f.clone(), !d)).collect(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .fields
            .iter()
            .map(|(field, forward)| {
                if *forward {
                    format!("{field}")
                } else {
                    format!("^{field}")
                }
            })
            .collect();
        write!(f, "[{}]", names.join(","))
    }
}

// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

/// An ordered, contiguous list of steps starting from a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    /// One more table than steps; `tables[i + 1] == steps[i].to`.
    tables: Vec<String>,
    steps: Vec<Step>,
}

impl Path {
    /// A zero-length path at `start`.
    pub fn new(start: &str) -> Self {
        Path {
            tables: vec![start.to_string()],
            steps: Vec::new(),
        }
    }

    /// Builds a path from names: a table first, then either tables (every key
    /// between the two) or qualified fields `TABLE.FIELD` (direction inferred).
    pub fn parse(schema: &Schema, items: &[&str]) -> Result<Path, CoreError> {
        let (first, rest) = items.split_first().ok_or_else(|| CoreError::UnknownTable {
            table: String::new(),
        })?;
        let mut res = Path::new(schema.table(first)?.name.as_str());
        for item in rest {
            res = match FieldRef::parse(item) {
                Some(field) => res.add_field(schema, &field, None)?,
                None => res.add_table(schema, item)?,
            };
        }
        Ok(res)
    }

    /// Appends one step, which must begin where this path ends.
    pub fn add(&self, step: Step) -> Result<Path, CoreError> {
        let mut res = self.clone();
        res.push(step)?;
        Ok(res)
    }

    pub fn add_field(
        &self,
        schema: &Schema,
        field: &FieldRef,
        direction: Option<bool>,
    ) -> Result<Path, CoreError> {
        self.add(Step::create(schema, self.last(), field, direction)?)
    }

    /// Appends a step through every key between the current end and `table`.
    pub fn add_table(&self, schema: &Schema, table: &str) -> Result<Path, CoreError> {
        self.add(Step::between(schema, self.last(), table)?)
    }

    pub(crate) fn push(&mut self, step: Step) -> Result<(), CoreError> {
        if step.from != *self.last() {
            return Err(CoreError::BrokenPath {
                path_end: self.last().to_string(),
                step_start: step.from.clone(),
            });
        }
        self.tables.push(step.to.clone());
        self.steps.push(step);
        Ok(())
    }

    /// Appends `other`, which must start where this path ends.
    pub fn append(&self, other: &Path) -> Result<Path, CoreError> {
        if self.last() != other.first() {
            return Err(CoreError::BrokenPath {
                path_end: self.last().to_string(),
                step_start: other.first().to_string(),
            });
        }
        let mut res = self.clone();
        res.steps.extend(other.steps.iter().cloned());
        res.tables.extend(other.tables.iter().skip(1).cloned());
        Ok(res)
    }

    /// The path through the same tables, in the other direction.
    pub fn reverse(&self) -> Path {
        Path {
            tables: self.tables.iter().rev().cloned().collect(),
            steps: self.steps.iter().rev().map(Step::reverse).collect(),
        }
    }

    /// Number of steps.
    pub fn length(&self) -> usize {
        self.steps.len()
    }

    pub fn first(&self) -> &str {
        &self.tables[0]
    }

    pub fn last(&self) -> &str {
        &self.tables[self.tables.len() - 1]
    }

    /// Table at position `i`, between 0 and `length()` inclusive.
    pub fn table(&self, i: usize) -> Option<&str> {
        self.tables.get(i).map(String::as_str)
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The step connecting table `i` to `i + 1`.
    pub fn step(&self, i: usize) -> Option<&Step> {
        self.steps.get(i)
    }

    /// The field connecting table `i` to `i + 1`, `None` if there are several.
    pub fn single_step(&self, i: usize) -> Option<&FieldRef> {
        self.steps.get(i).and_then(Step::single_field)
    }

    /// Whether there is exactly one field between each pair of tables.
    pub fn is_single_link(&self) -> bool {
        self.steps.iter().all(|s| s.single_field().is_some())
    }

    /// Whether step `i` is crossed backward; `None` when mixed or out of range.
    pub fn is_backwards(&self, i: usize) -> Option<bool> {
        self.steps.get(i)?.is_foreign().map(|f| !f)
    }

    fn valid_index(&self, i: isize) -> Result<usize, CoreError> {
        let len = self.length() as isize;
        let resolved = if i < 0 { len + i } else { i };
        if resolved < 0 || resolved > len {
            return Err(CoreError::PathIndex {
                index: i,
                length: self.length(),
            });
        }
        Ok(resolved as usize)
    }

    /// The steps between `from` (inclusive) and `to` (exclusive). Negative
    /// indices count from the end, e.g. `sub_path(0, -1)` drops the last step.
    pub fn sub_path(&self, from: isize, to: isize) -> Result<Path, CoreError> {
        let from = self.valid_index(from)?;
        let to = self.valid_index(to)?;
        if from > to {
            return Err(CoreError::PathRange { from, to });
        }
        Ok(Path {
            tables: self.tables[from..=to].to_vec(),
            steps: self.steps[from..to].to_vec(),
        })
    }

    pub fn minus_first(&self) -> Result<Path, CoreError> {
        self.sub_path(1, self.length() as isize)
    }

    pub fn minus_last(&self) -> Result<Path, CoreError> {
        self.sub_path(0, -1)
    }

    pub fn just_first(&self) -> Result<Path, CoreError> {
        self.sub_path(0, 1)
    }

    pub fn starts_with(&self, other: &Path) -> bool {
        self.length() >= other.length()
            && self.first() == other.first()
            && self.steps[..other.length()] == other.steps[..]
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.first() == other.first() && self.steps == other.steps
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first().hash(state);
        self.steps.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first())?;
        for (step, table) in self.steps.iter().zip(self.tables.iter().skip(1)) {
            write!(f, " {step} {table}")?;
        }
        Ok(())
    }
}
