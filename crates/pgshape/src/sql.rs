//! DDL rendering for [`Change`]s.

use pgshape_schema::{
    CheckConstraint, DefaultValue, Field, FkAction, ForeignKey, Index, IndexMember, MemberKind,
};
use std::fmt;

use crate::{Change, FieldChange, IndexChange};

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use pgshape::sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.0.as_ref().replace('\'', "''"))
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes, so
/// reserved words like `user` or `order` are safe.
///
/// # Example
/// ```
/// use pgshape::sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.as_ref().replace('"', "\"\""))
    }
}

fn ident_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| Ident(n).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a whole change list as one script, one statement per line.
pub fn script(changes: &[Change]) -> String {
    let mut sql = String::new();
    for change in changes {
        for statement in change.to_sql() {
            sql.push_str(&statement);
            sql.push_str(";\n");
        }
    }
    sql
}

impl Change {
    /// The statements applying this change, in order, without trailing
    /// semicolons.
    pub fn to_sql(&self) -> Vec<String> {
        match self {
            Change::CreateTable {
                name,
                fields,
                indices,
                checks,
            } => {
                let mut lines: Vec<String> = fields.iter().map(column_sql).collect();
                let primary_key: Vec<String> = fields
                    .iter()
                    .filter(|f| f.primary_key)
                    .map(|f| f.name.clone())
                    .collect();
                if !primary_key.is_empty() {
                    lines.push(format!("PRIMARY KEY ({})", ident_list(&primary_key)));
                }
                lines.extend(checks.iter().map(check_sql));

                let mut statements: Vec<String> = fields
                    .iter()
                    .filter_map(|f| sequence_sql(f.default.as_ref()))
                    .collect();
                statements.push(format!(
                    "CREATE TABLE {} (\n    {}\n)",
                    Ident(name),
                    lines.join(",\n    ")
                ));
                statements.extend(indices.iter().map(|i| create_index_sql(name, i)));
                statements
            }
            Change::DropTable(name) => vec![format!("DROP TABLE {}", Ident(name))],
            Change::AlterTable {
                name,
                fields,
                indices,
            } => alter_table_sql(name, fields, indices),
            Change::CreateForeignKey { table, key } => vec![format!(
                "ALTER TABLE {} ADD {}",
                Ident(table),
                foreign_key_sql(key)
            )],
            Change::DropForeignKey { table, name } | Change::DropCheck { table, name } => {
                vec![format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                    Ident(table),
                    Ident(name)
                )]
            }
            Change::CreateCheck { table, check } => vec![format!(
                "ALTER TABLE {} ADD {}",
                Ident(table),
                check_sql(check)
            )],
            Change::CreateEnum(e) => {
                let values: Vec<String> = e.values.iter().map(|v| Lit(v).to_string()).collect();
                vec![format!(
                    "CREATE TYPE {} AS ENUM ({})",
                    Ident(&e.name),
                    values.join(", ")
                )]
            }
            Change::DropEnum(name) => vec![format!("DROP TYPE {}", Ident(name))],
            Change::AddEnumValue {
                name,
                value,
                before,
            } => {
                let position = before
                    .as_ref()
                    .map(|b| format!(" BEFORE {}", Lit(b)))
                    .unwrap_or_default();
                vec![format!(
                    "ALTER TYPE {} ADD VALUE {}{}",
                    Ident(name),
                    Lit(value),
                    position
                )]
            }
            Change::CreateExtension(name) => {
                vec![format!("CREATE EXTENSION IF NOT EXISTS {}", Ident(name))]
            }
            Change::DropExtension(name) => vec![format!("DROP EXTENSION {}", Ident(name))],
        }
    }
}

fn alter_table_sql(table: &str, fields: &[FieldChange], indices: &[IndexChange]) -> Vec<String> {
    let alter = format!("ALTER TABLE {}", Ident(table));
    let mut statements = Vec::new();
    let mut dropped_primary_key = false;
    let mut primary_key = Vec::new();

    for change in fields {
        match change {
            FieldChange::CreateColumn(field) => {
                statements.extend(sequence_sql(field.default.as_ref()));
                statements.push(format!("{} ADD COLUMN {}", alter, column_sql(field)));
                if field.primary_key {
                    primary_key.push(field.name.clone());
                }
            }
            FieldChange::DropColumn(name) => {
                statements.push(format!("{} DROP COLUMN {}", alter, Ident(name)));
            }
            FieldChange::RenameColumn { from, to } => statements.push(format!(
                "{} RENAME COLUMN {} TO {}",
                alter,
                Ident(from),
                Ident(to)
            )),
            FieldChange::AlterColumnType { name, to, .. } => statements.push(format!(
                "{} ALTER COLUMN {} TYPE {} USING {}::{}",
                alter,
                Ident(name),
                to,
                Ident(name),
                to
            )),
            FieldChange::CreatePrimaryKey(name) => primary_key.push(name.clone()),
            FieldChange::DropPrimaryKey(_) => {
                // One constraint covers every key column.
                if !dropped_primary_key {
                    dropped_primary_key = true;
                    statements.push(drop_primary_key_sql(table));
                }
            }
            FieldChange::AllowNull(name) => statements.push(format!(
                "{} ALTER COLUMN {} DROP NOT NULL",
                alter,
                Ident(name)
            )),
            FieldChange::DisallowNull(name) => statements.push(format!(
                "{} ALTER COLUMN {} SET NOT NULL",
                alter,
                Ident(name)
            )),
            FieldChange::AlterColumnDefault { name, to, .. } => match to {
                Some(default) => {
                    statements.extend(sequence_sql(Some(default)));
                    statements.push(format!(
                        "{} ALTER COLUMN {} SET DEFAULT {}",
                        alter,
                        Ident(name),
                        default
                    ))
                }
                None => statements.push(format!(
                    "{} ALTER COLUMN {} DROP DEFAULT",
                    alter,
                    Ident(name)
                )),
            },
        }
    }

    if !primary_key.is_empty() {
        statements.push(format!(
            "{} ADD PRIMARY KEY ({})",
            alter,
            ident_list(&primary_key)
        ));
    }

    for change in indices {
        match change {
            IndexChange::CreateIndex(index) => statements.push(create_index_sql(table, index)),
            IndexChange::DropIndex(name) => {
                // The index may already be gone with a dropped column.
                statements.push(format!("DROP INDEX IF EXISTS {}", Ident(name)))
            }
        }
    }

    statements
}

/// Drop the table's primary key under whatever name it was created with.
///
/// The constraint is looked up when the statement runs, so a key that went
/// away with a dropped column is not an error.
fn drop_primary_key_sql(table: &str) -> String {
    let relation = Ident(table).to_string();
    format!(
        "DO $pgshape$ DECLARE pkey text; BEGIN \
         SELECT conname INTO pkey FROM pg_constraint \
         WHERE conrelid = {}::regclass AND contype = 'p'; \
         IF pkey IS NOT NULL THEN \
         EXECUTE format('ALTER TABLE %s DROP CONSTRAINT %I', {}, pkey); \
         END IF; END $pgshape$",
        Lit(&relation),
        Lit(&relation)
    )
}

/// Column definition as used by CREATE TABLE and ADD COLUMN.
///
/// Primary keys are declared as a table constraint, not here.
fn column_sql(field: &Field) -> String {
    let mut sql = format!("{} {}", Ident(&field.name), field.ty);
    if !field.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &field.default {
        sql.push_str(&format!(" DEFAULT {}", default));
    }
    sql
}

/// Sequences are created on demand for `nextval` defaults.
fn sequence_sql(default: Option<&DefaultValue>) -> Option<String> {
    match default {
        Some(DefaultValue::Sequence(name)) => {
            Some(format!("CREATE SEQUENCE IF NOT EXISTS {}", Ident(name)))
        }
        _ => None,
    }
}

fn check_sql(check: &CheckConstraint) -> String {
    format!("CONSTRAINT {} CHECK ({})", Ident(&check.name), check.condition)
}

fn foreign_key_sql(key: &ForeignKey) -> String {
    let mut sql = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}",
        Ident(&key.name),
        ident_list(&key.fields),
        Ident(&key.references)
    );
    if !key.keys.is_empty() {
        sql.push_str(&format!(" ({})", ident_list(&key.keys)));
    }
    if key.on_delete != FkAction::NoAction {
        sql.push_str(&format!(" ON DELETE {}", key.on_delete.to_sql()));
    }
    if key.on_update != FkAction::NoAction {
        sql.push_str(&format!(" ON UPDATE {}", key.on_update.to_sql()));
    }
    if key.deferrable {
        sql.push_str(" DEFERRABLE");
    }
    sql
}

fn member_sql(member: &IndexMember) -> String {
    let mut sql = match &member.kind {
        MemberKind::Field(name) => Ident(name).to_string(),
        MemberKind::Expression(expression) => format!("({})", expression),
    };
    sql.push_str(member.order.to_sql());
    if member.nulls != member.order.default_nulls() {
        sql.push_str(member.nulls.to_sql());
    }
    sql
}

/// Generate CREATE INDEX SQL for an index on `table`.
pub fn create_index_sql(table: &str, index: &Index) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let members: Vec<String> = index.members.iter().map(member_sql).collect();
    let mut sql = format!(
        "CREATE {}INDEX {} ON {} USING {} ({})",
        unique,
        Ident(&index.name),
        Ident(table),
        index.method.as_str(),
        members.join(", ")
    );
    if let Some(condition) = &index.condition {
        sql.push_str(&format!(" WHERE {}", condition));
    }
    sql
}
