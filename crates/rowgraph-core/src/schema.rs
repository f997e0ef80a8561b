//! Relational metadata consumed by the row-value graph.
//!
//! The backing store owns the real table definitions; this module is the
//! narrow view the core needs of them: per-table primary key, optional order
//! field, field types and nullability, and which fields are foreign keys to
//! which table. [`IndexMap`] keeps declaration order so that generated
//! statements and error messages are deterministic.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::value::Value;

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl FieldType {
    /// Whether a non-null `value` may be stored in a field of this type.
    /// Integers are accepted by real fields.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Integer, Value::Integer(_)) => true,
            (FieldType::Real, Value::Real(_) | Value::Integer(_)) => true,
            (FieldType::Text, Value::Text(_)) => true,
            (FieldType::Boolean, Value::Boolean(_)) => true,
            _ => false,
        }
    }
}

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
    /// Value the store uses when the field is omitted from an insert.
    pub default: Option<Value>,
    /// Target table when this field is a foreign key.
    pub foreign_table: Option<String>,
}

impl FieldDef {
    /// A nullable field without default.
    pub fn new(name: &str, ty: FieldType) -> Self {
        FieldDef {
            name: name.to_string(),
            ty,
            nullable: true,
            default: None,
            foreign_table: None,
        }
    }

    /// A nullable integer foreign key to `table`.
    pub fn foreign(name: &str, table: &str) -> Self {
        FieldDef {
            foreign_table: Some(table.to_string()),
            ..FieldDef::new(name, FieldType::Integer)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn is_foreign(&self) -> bool {
        self.foreign_table.is_some()
    }
}

/// Definition of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub primary_key: String,
    /// Field holding the row's position, assigned by the store on insert
    /// unless the caller supplies it.
    pub order_field: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
}

impl TableDef {
    /// Creates a table whose only field is its integer primary key.
    pub fn new(name: &str, primary_key: &str) -> Self {
        let mut fields = IndexMap::new();
        fields.insert(
            primary_key.to_string(),
            FieldDef::new(primary_key, FieldType::Integer).not_null(),
        );
        TableDef {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            order_field: None,
            fields,
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Adds a non-null real order field.
    pub fn with_order_field(mut self, name: &str) -> Self {
        self.fields
            .insert(name.to_string(), FieldDef::new(name, FieldType::Real).not_null());
        self.order_field = Some(name.to_string());
        self
    }

    pub fn field(&self, name: &str) -> Result<&FieldDef, CoreError> {
        self.fields.get(name).ok_or_else(|| CoreError::UnknownField {
            table: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Foreign key fields of this table, in declaration order.
    pub fn foreign_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().filter(|f| f.is_foreign())
    }

    /// Whether an insert must provide `field`: non-null, no default, and not
    /// generated by the store.
    pub fn is_required(&self, field: &FieldDef) -> bool {
        !field.nullable
            && field.default.is_none()
            && field.name != self.primary_key
            && self.order_field.as_deref() != Some(field.name.as_str())
    }

    /// Checks scalar values and link field names against this table.
    ///
    /// `inserting` additionally requires every required field to be present,
    /// either as a scalar or as a link that the commit will resolve.
    pub fn validate<'a>(
        &self,
        scalars: impl IntoIterator<Item = (&'a str, &'a Value)>,
        links: &[&str],
        inserting: bool,
    ) -> Result<(), CoreError> {
        let fail = |reason: String| CoreError::Validation {
            table: self.name.clone(),
            reason,
        };
        let mut present: Vec<&str> = Vec::new();
        for (name, value) in scalars {
            let def = self.field(name)?;
            if value.is_null() && !def.nullable {
                return Err(fail(format!("'{name}' cannot be null")));
            }
            if !def.ty.accepts(value) {
                return Err(fail(format!("'{name}' expects {:?}, got {value}", def.ty)));
            }
            present.push(name);
        }
        for &name in links {
            let def = self.field(name)?;
            if !def.is_foreign() {
                return Err(fail(format!("'{name}' is not a foreign key")));
            }
            present.push(name);
        }
        if inserting {
            if let Some(missing) = self
                .fields
                .values()
                .find(|f| self.is_required(f) && !present.contains(&f.name.as_str()))
            {
                return Err(fail(format!("required field '{}' is missing", missing.name)));
            }
        }
        Ok(())
    }
}

/// A field qualified by its table.
///
/// Ordering is by table then field name, which is the order of the quoted
/// SQL names as long as names contain no character sorting before `"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub table: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(table: &str, name: &str) -> Self {
        FieldRef {
            table: table.to_string(),
            name: name.to_string(),
        }
    }

    /// Parses `TABLE.FIELD`.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (table, name) = qualified.split_once('.')?;
        Some(FieldRef::new(table, name))
    }

    /// Canonical quoted SQL name, `"TABLE"."FIELD"`.
    pub fn quoted(&self) -> String {
        format!("\"{}\".\"{}\"", self.table, self.name)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// The set of tables of one database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    tables: IndexMap<String, TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn table(&self, name: &str) -> Result<&TableDef, CoreError> {
        self.tables.get(name).ok_or_else(|| CoreError::UnknownTable {
            table: name.to_string(),
        })
    }

    pub fn field(&self, field: &FieldRef) -> Result<&FieldDef, CoreError> {
        self.table(&field.table)?.field(&field.name)
    }

    /// Target table of a foreign key, erroring if `field` is not one.
    pub fn foreign_target(&self, field: &FieldRef) -> Result<&str, CoreError> {
        self.field(field)?
            .foreign_table
            .as_deref()
            .ok_or_else(|| CoreError::InvalidStep {
                from: field.table.clone(),
                field: field.to_string(),
                reason: "not a foreign key".to_string(),
            })
    }

    /// Foreign keys of every table, `table` included, referencing `table`.
    pub fn referencing_fields(&self, table: &str) -> Vec<FieldRef> {
        self.tables
            .values()
            .flat_map(|t| {
                t.foreign_fields()
                    .filter(move |f| f.foreign_table.as_deref() == Some(table))
                    .map(move |f| FieldRef::new(&t.name, &f.name))
            })
            .collect()
    }

    /// Every foreign key between `from` and `to`, with its direction when
    /// crossed from `from`: `true` for `from`'s own keys, `false` for `to`'s
    /// keys pointing back at `from`. A self-referencing key of a table
    /// appears once in each direction.
    pub fn foreign_fields_between(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Vec<(FieldRef, bool)>, CoreError> {
        let from_def = self.table(from)?;
        let to_def = self.table(to)?;
        let mut res = Vec::new();
        for f in from_def.foreign_fields() {
            if f.foreign_table.as_deref() == Some(to) {
                res.push((FieldRef::new(from, &f.name), true));
            }
        }
        for f in to_def.foreign_fields() {
            if f.foreign_table.as_deref() == Some(from) {
                res.push((FieldRef::new(to, &f.name), false));
            }
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_schema;

    #[test]
    fn table_lookup_errors_on_unknown_names() {
        let schema = sample_schema();
        assert!(schema.table("SITE").is_ok());
        assert_eq!(
            schema.table("NOPE").unwrap_err(),
            CoreError::UnknownTable { table: "NOPE".into() }
        );
        assert!(matches!(
            schema.field(&FieldRef::new("SITE", "NOPE")),
            Err(CoreError::UnknownField { .. })
        ));
    }

    #[test]
    fn quoted_names_order_like_fields() {
        let a = FieldRef::new("LOCAL", "ID_BATIMENT");
        let b = FieldRef::new("LOCAL", "ID_LOCAL_PARENT");
        assert_eq!(a.quoted(), "\"LOCAL\".\"ID_BATIMENT\"");
        assert_eq!(a.cmp(&b), a.quoted().cmp(&b.quoted()));
    }

    #[test]
    fn foreign_fields_between_lists_both_directions() {
        let schema = sample_schema();
        let fields = schema.foreign_fields_between("SITE", "CONTACT").unwrap();
        assert_eq!(
            fields,
            vec![
                (FieldRef::new("SITE", "ID_CONTACT_RAPPORT"), true),
                (FieldRef::new("SITE", "ID_CONTACT_UTILE"), true),
                (FieldRef::new("CONTACT", "ID_SITE"), false),
            ]
        );
    }

    #[test]
    fn referencing_fields_include_self_references() {
        let schema = sample_schema();
        assert_eq!(
            schema.referencing_fields("LOCAL"),
            vec![
                FieldRef::new("LOCAL", "ID_LOCAL_PARENT"),
                FieldRef::new("CPI_BT", "ID_LOCAL"),
            ]
        );
        assert!(schema.referencing_fields("CPI_BT").is_empty());
    }

    #[test]
    fn validate_rejects_bad_types_and_missing_required_fields() {
        let schema = sample_schema();
        let contact = schema.table("CONTACT").unwrap();
        let nom = Value::from("Dupont");
        let bad = Value::Integer(3);

        assert!(contact.validate([("NOM", &nom)], &[], true).is_ok());
        assert!(matches!(
            contact.validate([("NOM", &bad)], &[], true),
            Err(CoreError::Validation { .. })
        ));
        // NOM is required on insert, but not on update.
        assert!(contact.validate(std::iter::empty(), &[], true).is_err());
        assert!(contact.validate(std::iter::empty(), &[], false).is_ok());
        // ID_SITE can be satisfied by a link.
        assert!(contact.validate([("NOM", &nom)], &["ID_SITE"], true).is_ok());
        assert!(contact.validate([("NOM", &nom)], &["NOM"], true).is_err());
    }

    #[test]
    fn order_field_and_primary_key_are_not_required() {
        let schema = sample_schema();
        let local = schema.table("LOCAL").unwrap();
        let order = local.field("ORDRE").unwrap();
        let pk = local.field("ID").unwrap();
        assert!(!local.is_required(order));
        assert!(!local.is_required(pk));
    }
}
