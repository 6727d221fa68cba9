//! An in-memory database for unit tests.
//!
//! Applies changes to a [`Schema`] value and stores expressions the way
//! Postgres would, wrapped in parentheses, so that the normalizer has
//! something to canonicalize.

use std::sync::Mutex;

use pgshape_schema::{CheckConstraint, Enum, Extension, Field, Index, MemberKind, Schema, Table};

use crate::db::{Reader, Runner, Transactional};
use crate::{BoxFuture, Change, Error, FieldChange, IndexChange, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Begin,
    Commit,
    Rollback,
    Run(Vec<Change>),
}

#[derive(Default)]
struct State {
    schema: Schema,
    snapshot: Option<Schema>,
    events: Vec<Event>,
    failing_on: Option<String>,
    drops_defaults: bool,
}

pub(crate) struct FakeDb {
    state: Mutex<State>,
}

impl FakeDb {
    pub(crate) fn new(schema: Schema) -> Self {
        Self {
            state: Mutex::new(State {
                schema,
                ..State::default()
            }),
        }
    }

    /// Reject any batch whose SQL contains `pattern`.
    pub(crate) fn failing_on(self, pattern: &str) -> Self {
        self.state.lock().unwrap().failing_on = Some(pattern.to_string());
        self
    }

    /// Silently discard column defaults, so migrations never converge.
    pub(crate) fn dropping_defaults(self) -> Self {
        self.state.lock().unwrap().drops_defaults = true;
        self
    }

    pub(crate) fn schema(&self) -> Schema {
        self.state.lock().unwrap().schema.clone()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> BoxFuture<'_, Result<T>>
    where
        T: Send + 'static,
    {
        let result = f(&mut self.state.lock().unwrap());
        Box::pin(std::future::ready(result))
    }
}

impl Reader for FakeDb {
    fn read_schema(&self) -> BoxFuture<'_, Result<Schema>> {
        self.with_state(|state| Ok(state.schema.clone()))
    }

    fn read_table<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Table>>> {
        let table = self.state.lock().unwrap().schema.get_table(name).cloned();
        Box::pin(std::future::ready(Ok(table)))
    }

    fn read_enums(&self) -> BoxFuture<'_, Result<Vec<Enum>>> {
        self.with_state(|state| Ok(state.schema.enums.clone()))
    }

    fn read_extensions(&self) -> BoxFuture<'_, Result<Vec<Extension>>> {
        self.with_state(|state| Ok(state.schema.extensions.clone()))
    }
}

impl Runner for FakeDb {
    fn run<'a>(&'a self, changes: &'a [Change]) -> BoxFuture<'a, Result<()>> {
        let changes = changes.to_vec();
        self.with_state(move |state| {
            state.events.push(Event::Run(changes.clone()));
            if let Some(pattern) = &state.failing_on {
                for change in &changes {
                    let rejected = change.to_sql().into_iter().find(|s| s.contains(pattern.as_str()));
                    if let Some(statement) = rejected {
                        return Err(Error::Catalog(format!("rejected: {statement}")));
                    }
                }
            }
            let drops_defaults = state.drops_defaults;
            for change in changes {
                apply(&mut state.schema, change, drops_defaults)?;
            }
            Ok(())
        })
    }
}

impl Transactional for FakeDb {
    fn begin(&self) -> BoxFuture<'_, Result<()>> {
        self.with_state(|state| {
            state.events.push(Event::Begin);
            state.snapshot = Some(state.schema.clone());
            Ok(())
        })
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        self.with_state(|state| {
            state.events.push(Event::Commit);
            state.snapshot = None;
            Ok(())
        })
    }

    fn rollback(&self) -> BoxFuture<'_, Result<()>> {
        self.with_state(|state| {
            state.events.push(Event::Rollback);
            if let Some(snapshot) = state.snapshot.take() {
                state.schema = snapshot;
            }
            Ok(())
        })
    }
}

fn stored(expression: &str) -> String {
    if expression.starts_with('(') && expression.ends_with(')') {
        expression.to_string()
    } else {
        format!("({expression})")
    }
}

fn stored_index(mut index: Index) -> Index {
    for member in &mut index.members {
        if let MemberKind::Expression(sql) = &member.kind {
            member.kind = MemberKind::Expression(stored(sql));
        }
    }
    index.condition = index.condition.as_deref().map(stored);
    index
}

fn stored_check(check: CheckConstraint) -> CheckConstraint {
    CheckConstraint {
        condition: stored(&check.condition),
        ..check
    }
}

fn table_mut<'a>(schema: &'a mut Schema, name: &str) -> Result<&'a mut Table> {
    schema
        .tables
        .iter_mut()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::Catalog(format!("no table `{name}`")))
}

fn apply(schema: &mut Schema, change: Change, drops_defaults: bool) -> Result<()> {
    match change {
        Change::CreateTable {
            name,
            mut fields,
            indices,
            checks,
        } => {
            if schema.get_table(&name).is_some() {
                return Err(Error::Catalog(format!("table `{name}` already exists")));
            }
            if drops_defaults {
                for field in &mut fields {
                    field.default = None;
                }
            }
            schema.tables.push(Table {
                name,
                fields,
                indices: indices.into_iter().map(stored_index).collect(),
                checks: checks.into_iter().map(stored_check).collect(),
                foreign_keys: Vec::new(),
            });
        }
        Change::DropTable(name) => schema.tables.retain(|t| t.name != name),
        Change::AlterTable {
            name,
            fields,
            indices,
        } => {
            let table = table_mut(schema, &name)?;
            for change in fields {
                alter_field(table, change, drops_defaults)?;
            }
            for change in indices {
                match change {
                    IndexChange::CreateIndex(index) => table.indices.push(stored_index(index)),
                    IndexChange::DropIndex(name) => table.indices.retain(|i| i.name != name),
                }
            }
        }
        Change::CreateForeignKey { table, key } => table_mut(schema, &table)?.foreign_keys.push(key),
        Change::DropForeignKey { table, name } => {
            if let Ok(table) = table_mut(schema, &table) {
                table.foreign_keys.retain(|k| k.name != name);
            }
        }
        Change::CreateCheck { table, check } => {
            table_mut(schema, &table)?.checks.push(stored_check(check))
        }
        Change::DropCheck { table, name } => {
            if let Ok(table) = table_mut(schema, &table) {
                table.checks.retain(|c| c.name != name);
            }
        }
        Change::CreateEnum(e) => schema.enums.push(e),
        Change::DropEnum(name) => schema.enums.retain(|e| e.name != name),
        Change::AddEnumValue {
            name,
            value,
            before,
        } => {
            let e = schema
                .enums
                .iter_mut()
                .find(|e| e.name == name)
                .ok_or_else(|| Error::Catalog(format!("no enum `{name}`")))?;
            let at = before
                .and_then(|b| e.values.iter().position(|v| *v == b))
                .unwrap_or(e.values.len());
            e.values.insert(at, value);
        }
        Change::CreateExtension(name) => {
            if !schema.extensions.iter().any(|e| e.name == name) {
                schema.extensions.push(Extension::new(name));
            }
        }
        Change::DropExtension(name) => schema.extensions.retain(|e| e.name != name),
    }
    Ok(())
}

fn column_mut<'a>(table: &'a mut Table, name: &str) -> Result<&'a mut Field> {
    table
        .fields
        .iter_mut()
        .find(|f| f.name == name)
        .ok_or_else(|| Error::Catalog(format!("no column `{name}`")))
}

fn alter_field(table: &mut Table, change: FieldChange, drops_defaults: bool) -> Result<()> {
    match change {
        FieldChange::CreateColumn(mut f) => {
            if drops_defaults {
                f.default = None;
            }
            table.fields.push(f);
        }
        FieldChange::DropColumn(name) => table.fields.retain(|f| f.name != name),
        FieldChange::RenameColumn { from, to } => column_mut(table, &from)?.name = to,
        FieldChange::AlterColumnType { name, to, .. } => column_mut(table, &name)?.ty = to,
        FieldChange::CreatePrimaryKey(name) => {
            let f = column_mut(table, &name)?;
            f.primary_key = true;
            f.nullable = false;
        }
        FieldChange::DropPrimaryKey(name) => column_mut(table, &name)?.primary_key = false,
        FieldChange::AllowNull(name) => column_mut(table, &name)?.nullable = true,
        FieldChange::DisallowNull(name) => column_mut(table, &name)?.nullable = false,
        FieldChange::AlterColumnDefault { name, to, .. } => {
            if !drops_defaults {
                column_mut(table, &name)?.default = to;
            }
        }
    }
    Ok(())
}
