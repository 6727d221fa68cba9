//! Static consistency checks on a desired schema.

use pgshape_schema::{Schema, Table};
use std::fmt;

/// One thing wrong with a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// An index member names a column the table doesn't have.
    UnknownIndexField {
        table: String,
        index: String,
        field: String,
    },
    /// A foreign key's local column doesn't exist.
    UnknownKeyField {
        table: String,
        key: String,
        field: String,
    },
    /// A foreign key references a table the schema doesn't define.
    UnknownReferencedTable {
        table: String,
        key: String,
        references: String,
    },
    /// A foreign key references a column the referenced table doesn't have.
    UnknownReferencedField {
        table: String,
        key: String,
        references: String,
        field: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnknownIndexField {
                table,
                index,
                field,
            } => write!(
                f,
                "index `{}` on `{}` refers to unknown field `{}`",
                index, table, field
            ),
            Violation::UnknownKeyField { table, key, field } => write!(
                f,
                "foreign key `{}` on `{}` refers to unknown field `{}`",
                key, table, field
            ),
            Violation::UnknownReferencedTable {
                table,
                key,
                references,
            } => write!(
                f,
                "foreign key `{}` on `{}` references unknown table `{}`",
                key, table, references
            ),
            Violation::UnknownReferencedField {
                table,
                key,
                references,
                field,
            } => write!(
                f,
                "foreign key `{}` on `{}` references unknown field `{}.{}`",
                key, table, references, field
            ),
        }
    }
}

/// A schema failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schema:{}", list(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn list(violations: &[Violation]) -> String {
    violations.iter().map(|v| format!("\n  - {}", v)).collect()
}

/// Check that every index and foreign key refers to columns and tables that
/// exist.
///
/// Index and local key columns are checked for every table first; if any of
/// those fail, only that class of violation is reported. References to other
/// tables are checked only once every table is internally consistent.
pub fn validate(schema: &Schema) -> Result<(), ValidationError> {
    let mut violations: Vec<Violation> = schema.tables.iter().flat_map(local_violations).collect();

    if violations.is_empty() {
        violations = schema
            .tables
            .iter()
            .flat_map(|table| reference_violations(schema, table))
            .collect();
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

/// Shorthand for `validate(schema).is_ok()`.
pub fn is_valid(schema: &Schema) -> bool {
    validate(schema).is_ok()
}

fn local_violations(table: &Table) -> Vec<Violation> {
    let mut violations = Vec::new();

    for index in &table.indices {
        for field in index.members.iter().filter_map(|m| m.field_name()) {
            if table.get_field(field).is_none() {
                violations.push(Violation::UnknownIndexField {
                    table: table.name.clone(),
                    index: index.name.clone(),
                    field: field.to_string(),
                });
            }
        }
    }

    for key in &table.foreign_keys {
        for field in &key.fields {
            if table.get_field(field).is_none() {
                violations.push(Violation::UnknownKeyField {
                    table: table.name.clone(),
                    key: key.name.clone(),
                    field: field.clone(),
                });
            }
        }
    }

    violations
}

fn reference_violations(schema: &Schema, table: &Table) -> Vec<Violation> {
    let mut violations = Vec::new();

    for key in &table.foreign_keys {
        let Some(referenced) = schema.get_table(&key.references) else {
            violations.push(Violation::UnknownReferencedTable {
                table: table.name.clone(),
                key: key.name.clone(),
                references: key.references.clone(),
            });
            continue;
        };
        for field in &key.keys {
            if referenced.get_field(field).is_none() {
                violations.push(Violation::UnknownReferencedField {
                    table: table.name.clone(),
                    key: key.name.clone(),
                    references: key.references.clone(),
                    field: field.clone(),
                });
            }
        }
    }

    violations
}
