//! The operations the differ emits and the runner applies.
//!
//! Three levels: [`Change`] for whole-schema operations, [`FieldChange`] and
//! [`IndexChange`] for the per-table operations an [`Change::AlterTable`]
//! aggregates.

use pgshape_schema::{
    CheckConstraint, DefaultValue, Enum, Field, FieldType, ForeignKey, Index, MemberKind, Table,
};
use std::fmt;

/// A single schema-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Create a table with its columns, indices and checks.
    ///
    /// Foreign keys are created separately, once every table exists.
    CreateTable {
        name: String,
        fields: Vec<Field>,
        indices: Vec<Index>,
        checks: Vec<CheckConstraint>,
    },
    DropTable(String),
    /// Column and index operations on an existing table, in application order.
    AlterTable {
        name: String,
        fields: Vec<FieldChange>,
        indices: Vec<IndexChange>,
    },
    CreateForeignKey {
        table: String,
        key: ForeignKey,
    },
    DropForeignKey {
        table: String,
        name: String,
    },
    CreateCheck {
        table: String,
        check: CheckConstraint,
    },
    DropCheck {
        table: String,
        name: String,
    },
    CreateEnum(Enum),
    DropEnum(String),
    /// Add a label to an existing enum, before `before` or at the end.
    AddEnumValue {
        name: String,
        value: String,
        before: Option<String>,
    },
    CreateExtension(String),
    DropExtension(String),
}

impl Change {
    /// A `CreateTable` holding everything of `table` but its foreign keys.
    pub fn create_table(table: &Table) -> Self {
        Change::CreateTable {
            name: table.name.clone(),
            fields: table.fields.clone(),
            indices: table.indices.clone(),
            checks: table.checks.clone(),
        }
    }

    /// The table this change applies to, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Change::CreateTable { name, .. }
            | Change::DropTable(name)
            | Change::AlterTable { name, .. } => Some(name),
            Change::CreateForeignKey { table, .. }
            | Change::DropForeignKey { table, .. }
            | Change::CreateCheck { table, .. }
            | Change::DropCheck { table, .. } => Some(table),
            Change::CreateEnum(_)
            | Change::DropEnum(_)
            | Change::AddEnumValue { .. }
            | Change::CreateExtension(_)
            | Change::DropExtension(_) => None,
        }
    }
}

/// A column-level change inside [`Change::AlterTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    CreateColumn(Field),
    DropColumn(String),
    /// Only produced from an explicit rename override.
    RenameColumn {
        from: String,
        to: String,
    },
    AlterColumnType {
        name: String,
        from: FieldType,
        to: FieldType,
    },
    CreatePrimaryKey(String),
    DropPrimaryKey(String),
    AllowNull(String),
    DisallowNull(String),
    AlterColumnDefault {
        name: String,
        from: Option<DefaultValue>,
        to: Option<DefaultValue>,
    },
}

/// An index-level change inside [`Change::AlterTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndexChange {
    CreateIndex(Index),
    DropIndex(String),
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::CreateTable { name, fields, .. } => {
                write!(f, "+ table {} ({} columns)", name, fields.len())
            }
            Change::DropTable(name) => write!(f, "- table {}", name),
            Change::AlterTable {
                name,
                fields,
                indices,
            } => {
                write!(f, "~ table {}", name)?;
                for change in fields {
                    write!(f, "\n    {}", change)?;
                }
                for change in indices {
                    write!(f, "\n    {}", change)?;
                }
                Ok(())
            }
            Change::CreateForeignKey { table, key } => {
                let keys = if key.keys.is_empty() {
                    String::new()
                } else {
                    format!("({})", key.keys.join(", "))
                };
                write!(
                    f,
                    "+ {}: FOREIGN KEY {} ({}) -> {}{}",
                    table,
                    key.name,
                    key.fields.join(", "),
                    key.references,
                    keys
                )
            }
            Change::DropForeignKey { table, name } => {
                write!(f, "- {}: FOREIGN KEY {}", table, name)
            }
            Change::CreateCheck { table, check } => {
                write!(f, "+ {}: CHECK {} ({})", table, check.name, check.condition)
            }
            Change::DropCheck { table, name } => write!(f, "- {}: CHECK {}", table, name),
            Change::CreateEnum(e) => write!(f, "+ enum {} ({})", e.name, e.values.join(", ")),
            Change::DropEnum(name) => write!(f, "- enum {}", name),
            Change::AddEnumValue {
                name,
                value,
                before,
            } => match before {
                Some(before) => write!(f, "~ enum {}: + {} before {}", name, value, before),
                None => write!(f, "~ enum {}: + {}", name, value),
            },
            Change::CreateExtension(name) => write!(f, "+ extension {}", name),
            Change::DropExtension(name) => write!(f, "- extension {}", name),
        }
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldChange::CreateColumn(field) => {
                let nullable = if field.nullable { " (nullable)" } else { "" };
                write!(f, "+ {}: {}{}", field.name, field.ty, nullable)
            }
            FieldChange::DropColumn(name) => write!(f, "- {}", name),
            FieldChange::RenameColumn { from, to } => write!(f, "~ rename {} -> {}", from, to),
            FieldChange::AlterColumnType { name, from, to } => {
                write!(f, "~ {}: {} -> {}", name, from, to)
            }
            FieldChange::CreatePrimaryKey(name) => write!(f, "+ PRIMARY KEY ({})", name),
            FieldChange::DropPrimaryKey(name) => write!(f, "- PRIMARY KEY ({})", name),
            FieldChange::AllowNull(name) => write!(f, "~ {}: not null -> nullable", name),
            FieldChange::DisallowNull(name) => write!(f, "~ {}: nullable -> not null", name),
            FieldChange::AlterColumnDefault { name, from, to } => {
                let show = |d: &Option<DefaultValue>| {
                    d.as_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "(none)".to_string())
                };
                write!(f, "~ {} default: {} -> {}", name, show(from), show(to))
            }
        }
    }
}

impl fmt::Display for IndexChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexChange::CreateIndex(index) => {
                let unique = if index.unique { "UNIQUE " } else { "" };
                let members: Vec<&str> = index
                    .members
                    .iter()
                    .map(|m| match &m.kind {
                        MemberKind::Field(name) => name.as_str(),
                        MemberKind::Expression(sql) => sql.as_str(),
                    })
                    .collect();
                write!(
                    f,
                    "+ {}INDEX {} ({})",
                    unique,
                    index.name,
                    members.join(", ")
                )
            }
            IndexChange::DropIndex(name) => write!(f, "- INDEX {}", name),
        }
    }
}
