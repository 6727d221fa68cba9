//! Schema diffing: compare a desired schema against an actual one.
//!
//! [`between`] is a pure function producing the ordered list of [`Change`]s
//! that turns `actual` into `desired`. The order is part of the contract:
//!
//! 1. extensions are created
//! 2. enums are created or extended (or recreated)
//! 3. foreign keys are dropped (from dropped tables, and removed or changed keys)
//! 4. tables are created or altered, in name-union order; an altered
//!    table's check constraints are recreated right after its columns
//! 5. foreign keys are created (on created tables, and added or changed keys)
//! 6. tables are dropped
//! 7. enums are dropped
//! 8. extensions are dropped
//!
//! So tables exist before the keys that reference them, keys are gone before
//! their tables are, and a key never sees a column that doesn't exist yet.
//!
//! ## Name unions
//!
//! Every level (tables, fields, indices, checks, keys, enums, extensions) is
//! walked over the union of names: desired order first, then the names only
//! present in `actual`, in actual order.
//!
//! ## Renames
//!
//! Renames are never guessed. A column that disappears under one name and
//! appears under another is a [`FieldChange::DropColumn`] plus a
//! [`FieldChange::CreateColumn`], unless the caller passes a [`ColumnRename`]
//! to [`between_with_renames`].

use indexmap::IndexSet;
use pgshape_schema::{Enum, Field, PreconditionViolation, Schema, Table};

use crate::{Change, FieldChange, IndexChange};

/// An explicit column rename, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRename {
    pub table: String,
    pub from: String,
    pub to: String,
}

impl ColumnRename {
    pub fn new(table: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Compute the changes that turn `actual` into `desired`.
///
/// Both schemas must have unique names at every level; a duplicate is
/// returned as an error.
///
/// # Example
///
/// ```ignore
/// let changes = pgshape::between(&desired, &actual)?;
/// for change in &changes {
///     println!("{}", change);
/// }
/// ```
pub fn between(desired: &Schema, actual: &Schema) -> Result<Vec<Change>, PreconditionViolation> {
    between_with_renames(desired, actual, &[])
}

/// Like [`between`], with explicit column renames.
///
/// A rename applies when the actual table has a column `from` and no column
/// `to`, and the desired table has `to` and no `from`. The renamed column is
/// then compared attribute by attribute like any other.
pub fn between_with_renames(
    desired: &Schema,
    actual: &Schema,
    renames: &[ColumnRename],
) -> Result<Vec<Change>, PreconditionViolation> {
    desired.check_names()?;
    actual.check_names()?;

    let mut plan = Plan::default();

    for name in union(
        desired.extensions.iter().map(|e| e.name.as_str()),
        actual.extensions.iter().map(|e| e.name.as_str()),
    ) {
        let wanted = desired.extensions.iter().any(|e| e.name == name);
        let present = actual.extensions.iter().any(|e| e.name == name);
        match (wanted, present) {
            (true, false) => plan.create_extensions.push(Change::CreateExtension(name.into())),
            (false, true) => plan.drop_extensions.push(Change::DropExtension(name.into())),
            _ => {}
        }
    }

    for name in union(
        desired.enums.iter().map(|e| e.name.as_str()),
        actual.enums.iter().map(|e| e.name.as_str()),
    ) {
        match (desired.get_enum(name), actual.get_enum(name)) {
            (Some(wanted), None) => plan.enums.push(Change::CreateEnum(wanted.clone())),
            (None, Some(_)) => plan.drop_enums.push(Change::DropEnum(name.into())),
            (Some(wanted), Some(present)) if wanted != present => {
                diff_enum(wanted, present, &mut plan.enums)
            }
            _ => {}
        }
    }

    for name in union(
        desired.tables.iter().map(|t| t.name.as_str()),
        actual.tables.iter().map(|t| t.name.as_str()),
    ) {
        match (desired.get_table(name), actual.get_table(name)) {
            (Some(wanted), None) => {
                plan.tables.push(Change::create_table(wanted));
                for key in &wanted.foreign_keys {
                    plan.create_keys.push(Change::CreateForeignKey {
                        table: wanted.name.clone(),
                        key: key.clone(),
                    });
                }
            }
            (None, Some(present)) => {
                for key in &present.foreign_keys {
                    plan.drop_keys.push(Change::DropForeignKey {
                        table: present.name.clone(),
                        name: key.name.clone(),
                    });
                }
                plan.drop_tables.push(Change::DropTable(present.name.clone()));
            }
            (Some(wanted), Some(present)) if wanted != present => {
                let renames: Vec<&ColumnRename> =
                    renames.iter().filter(|r| r.table == name).collect();
                diff_table(wanted, present, &renames, &mut plan);
            }
            _ => {}
        }
    }

    Ok(plan.into_changes())
}

/// Changes bucketed by phase, flattened in phase order at the end.
#[derive(Default)]
struct Plan {
    create_extensions: Vec<Change>,
    enums: Vec<Change>,
    drop_keys: Vec<Change>,
    tables: Vec<Change>,
    create_keys: Vec<Change>,
    drop_tables: Vec<Change>,
    drop_enums: Vec<Change>,
    drop_extensions: Vec<Change>,
}

impl Plan {
    fn into_changes(self) -> Vec<Change> {
        [
            self.create_extensions,
            self.enums,
            self.drop_keys,
            self.tables,
            self.create_keys,
            self.drop_tables,
            self.drop_enums,
            self.drop_extensions,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn union<'a>(
    desired: impl Iterator<Item = &'a str>,
    actual: impl Iterator<Item = &'a str>,
) -> IndexSet<&'a str> {
    desired.chain(actual).collect()
}

/// Extend an enum in place when the existing labels keep their relative
/// order, recreate it otherwise.
fn diff_enum(wanted: &Enum, present: &Enum, out: &mut Vec<Change>) {
    if is_subsequence(&present.values, &wanted.values) {
        for (i, value) in wanted.values.iter().enumerate() {
            if present.values.contains(value) {
                continue;
            }
            let before = wanted.values[i + 1..]
                .iter()
                .find(|v| present.values.contains(*v))
                .cloned();
            out.push(Change::AddEnumValue {
                name: wanted.name.clone(),
                value: value.clone(),
                before,
            });
        }
    } else {
        tracing::warn!(
            name = %wanted.name,
            from = ?present.values,
            to = ?wanted.values,
            "enum labels were removed or reordered, recreating the type"
        );
        out.push(Change::DropEnum(wanted.name.clone()));
        out.push(Change::CreateEnum(wanted.clone()));
    }
}

fn is_subsequence(needle: &[String], haystack: &[String]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|n| rest.any(|h| h == n))
}

/// Diff two tables with the same name.
fn diff_table(wanted: &Table, present: &Table, renames: &[&ColumnRename], plan: &mut Plan) {
    let mut fields = Vec::new();

    // Apply renames to a copy of the actual columns so the comparison below
    // lines them up with their desired counterparts.
    let mut present_fields = present.fields.clone();
    for rename in renames {
        let applies = present.get_field(&rename.from).is_some()
            && present.get_field(&rename.to).is_none()
            && wanted.get_field(&rename.to).is_some()
            && wanted.get_field(&rename.from).is_none();
        if !applies {
            continue;
        }
        fields.push(FieldChange::RenameColumn {
            from: rename.from.clone(),
            to: rename.to.clone(),
        });
        if let Some(field) = present_fields.iter_mut().find(|f| f.name == rename.from) {
            field.name = rename.to.clone();
        }
    }

    diff_fields(&wanted.fields, &present_fields, &mut fields);

    let mut indices = Vec::new();
    for name in union(
        wanted.indices.iter().map(|i| i.name.as_str()),
        present.indices.iter().map(|i| i.name.as_str()),
    ) {
        match (wanted.get_index(name), present.get_index(name)) {
            (Some(index), None) => indices.push(IndexChange::CreateIndex(index.clone())),
            (None, Some(_)) => indices.push(IndexChange::DropIndex(name.into())),
            (Some(index), Some(existing)) if index != existing => {
                indices.push(IndexChange::DropIndex(name.into()));
                indices.push(IndexChange::CreateIndex(index.clone()));
            }
            _ => {}
        }
    }

    if !fields.is_empty() || !indices.is_empty() {
        plan.tables.push(Change::AlterTable {
            name: wanted.name.clone(),
            fields,
            indices,
        });
    }

    for name in union(
        wanted.checks.iter().map(|c| c.name.as_str()),
        present.checks.iter().map(|c| c.name.as_str()),
    ) {
        let check = wanted.get_check(name);
        let existing = present.get_check(name);
        if check == existing {
            continue;
        }
        if existing.is_some() {
            plan.tables.push(Change::DropCheck {
                table: wanted.name.clone(),
                name: name.into(),
            });
        }
        if let Some(check) = check {
            plan.tables.push(Change::CreateCheck {
                table: wanted.name.clone(),
                check: check.clone(),
            });
        }
    }

    for name in union(
        wanted.foreign_keys.iter().map(|k| k.name.as_str()),
        present.foreign_keys.iter().map(|k| k.name.as_str()),
    ) {
        let key = wanted.get_foreign_key(name);
        let existing = present.get_foreign_key(name);
        if key == existing {
            continue;
        }
        if existing.is_some() {
            plan.drop_keys.push(Change::DropForeignKey {
                table: wanted.name.clone(),
                name: name.into(),
            });
        }
        if let Some(key) = key {
            plan.create_keys.push(Change::CreateForeignKey {
                table: wanted.name.clone(),
                key: key.clone(),
            });
        }
    }
}

/// Diff columns between desired and actual state.
fn diff_fields(wanted: &[Field], present: &[Field], out: &mut Vec<FieldChange>) {
    for name in union(
        wanted.iter().map(|f| f.name.as_str()),
        present.iter().map(|f| f.name.as_str()),
    ) {
        let field = wanted.iter().find(|f| f.name == name);
        let existing = present.iter().find(|f| f.name == name);
        match (field, existing) {
            (Some(field), None) => out.push(FieldChange::CreateColumn(field.clone())),
            (None, Some(_)) => out.push(FieldChange::DropColumn(name.into())),
            (Some(field), Some(existing)) if field != existing => {
                diff_field(field, existing, out)
            }
            _ => {}
        }
    }
}

/// Independent toggles, in a fixed order. Any number of them may apply.
fn diff_field(wanted: &Field, present: &Field, out: &mut Vec<FieldChange>) {
    let name = &wanted.name;

    if wanted.ty != present.ty {
        out.push(FieldChange::AlterColumnType {
            name: name.clone(),
            from: present.ty.clone(),
            to: wanted.ty.clone(),
        });
    }

    if wanted.primary_key && !present.primary_key {
        out.push(FieldChange::CreatePrimaryKey(name.clone()));
    }
    if !wanted.primary_key && present.primary_key {
        out.push(FieldChange::DropPrimaryKey(name.clone()));
    }

    if wanted.nullable && !present.nullable {
        out.push(FieldChange::AllowNull(name.clone()));
    }
    if !wanted.nullable && present.nullable {
        out.push(FieldChange::DisallowNull(name.clone()));
    }

    if wanted.default != present.default {
        out.push(FieldChange::AlterColumnDefault {
            name: name.clone(),
            from: present.default.clone(),
            to: wanted.default.clone(),
        });
    }
}
