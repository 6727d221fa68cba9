//! Schema definition types for pgshape.
//!
//! Every definition here is an immutable value: it is built once (by a
//! front-end, or by reading the database catalog) and compared structurally.
//! Transformations such as normalization produce new values instead of
//! mutating existing ones.
//!
//! Both sides of a comparison, the desired schema and the actual one, use the
//! same types.

use indexmap::IndexSet;
use std::fmt;

mod types;
pub use types::*;

// =============================================================================
// Fields
// =============================================================================

/// A column default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefaultValue {
    /// A literal value, stored without quotes (`'0'`, `'mail@example.com'`).
    Literal(String),
    /// A SQL expression, e.g. `now()`.
    Expression(String),
    /// The next value of a sequence.
    Sequence(String),
}

impl DefaultValue {
    pub fn literal(value: impl fmt::Display) -> Self {
        DefaultValue::Literal(value.to_string())
    }

    pub fn expression(sql: impl Into<String>) -> Self {
        DefaultValue::Expression(sql.into())
    }

    pub fn sequence(name: impl Into<String>) -> Self {
        DefaultValue::Sequence(name.into())
    }
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => write!(f, "'{}'", value.replace('\'', "''")),
            DefaultValue::Expression(sql) => write!(f, "{}", sql),
            DefaultValue::Sequence(name) => {
                write!(f, "nextval('{}'::regclass)", name.replace('\'', "''"))
            }
        }
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name
    pub name: String,
    /// Column type with its attributes
    pub ty: FieldType,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Default value (if any)
    pub default: Option<DefaultValue>,
    /// Whether this column is (part of) the primary key
    pub primary_key: bool,
}

impl Field {
    /// A nullable column without default.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    /// Mark as primary key. Primary key columns are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

// =============================================================================
// Indices
// =============================================================================

/// Sort order for index members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Ascending order (default)
    #[default]
    Asc,
    /// Descending order
    Desc,
}

impl SortOrder {
    /// Returns the SQL keyword for this sort order, or empty string for ASC (default).
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "",
            SortOrder::Desc => " DESC",
        }
    }

    /// The nulls ordering the engine picks when none is given.
    pub fn default_nulls(&self) -> NullsOrder {
        match self {
            SortOrder::Asc => NullsOrder::Last,
            SortOrder::Desc => NullsOrder::First,
        }
    }
}

/// Nulls ordering for index members.
///
/// Always explicit: an omitted ordering is resolved through
/// [`SortOrder::default_nulls`] so that declared and introspected members
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullsOrder {
    /// Sort nulls before non-null values
    First,
    /// Sort nulls after non-null values
    Last,
}

impl NullsOrder {
    pub fn to_sql(&self) -> &'static str {
        match self {
            NullsOrder::First => " NULLS FIRST",
            NullsOrder::Last => " NULLS LAST",
        }
    }
}

/// What an index member points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A column of the indexed table
    Field(String),
    /// A raw SQL expression, e.g. `lower(email)`
    Expression(String),
}

/// One member of an index, with sort order and nulls ordering.
///
/// Equality and hashing look at `kind`, `order` and `nulls` only.
#[derive(Debug, Clone)]
pub struct IndexMember {
    pub kind: MemberKind,
    pub order: SortOrder,
    pub nulls: NullsOrder,
    /// Set by `nulls_first`/`nulls_last`; `desc` leaves `nulls` alone then.
    explicit_nulls: bool,
}

impl PartialEq for IndexMember {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.order == other.order && self.nulls == other.nulls
    }
}

impl Eq for IndexMember {}

impl std::hash::Hash for IndexMember {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.order.hash(state);
        self.nulls.hash(state);
    }
}

impl IndexMember {
    /// An ascending member over a table column.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            kind: MemberKind::Field(name.into()),
            order: SortOrder::Asc,
            nulls: NullsOrder::Last,
            explicit_nulls: false,
        }
    }

    /// An ascending member over an expression.
    pub fn expression(sql: impl Into<String>) -> Self {
        Self {
            kind: MemberKind::Expression(sql.into()),
            order: SortOrder::Asc,
            nulls: NullsOrder::Last,
            explicit_nulls: false,
        }
    }

    /// Switch to descending order.
    ///
    /// Nulls move first, as the engine does, unless `nulls_first` or
    /// `nulls_last` was called before.
    pub fn desc(mut self) -> Self {
        self.order = SortOrder::Desc;
        if !self.explicit_nulls {
            self.nulls = self.order.default_nulls();
        }
        self
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = NullsOrder::First;
        self.explicit_nulls = true;
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullsOrder::Last;
        self.explicit_nulls = true;
        self
    }

    /// The referenced column name, for field members.
    pub fn field_name(&self) -> Option<&str> {
        match &self.kind {
            MemberKind::Field(name) => Some(name),
            MemberKind::Expression(_) => None,
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self.kind, MemberKind::Expression(_))
    }

    /// Parse a member specification like `"col_name"`, `"col_name DESC"`, or
    /// `"col_name DESC NULLS FIRST"`.
    ///
    /// Anything that isn't a plain or quoted identifier (once the ordering
    /// suffixes are removed) is taken as an expression.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let upper = spec.to_uppercase();

        // Nulls ordering comes last
        let (rest, nulls) = if upper.ends_with(" NULLS FIRST") {
            (&spec[..spec.len() - 12], Some(NullsOrder::First))
        } else if upper.ends_with(" NULLS LAST") {
            (&spec[..spec.len() - 11], Some(NullsOrder::Last))
        } else {
            (spec, None)
        };

        let rest = rest.trim();
        let upper_rest = rest.to_uppercase();

        let (target, order) = if upper_rest.ends_with(" DESC") {
            (rest[..rest.len() - 5].trim(), SortOrder::Desc)
        } else if upper_rest.ends_with(" ASC") {
            (rest[..rest.len() - 4].trim(), SortOrder::Asc)
        } else {
            (rest, SortOrder::Asc)
        };

        let kind = if target.len() >= 2 && target.starts_with('"') && target.ends_with('"') {
            MemberKind::Field(target[1..target.len() - 1].replace("\"\"", "\""))
        } else if !target.is_empty()
            && target
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !target.starts_with(|c: char| c.is_ascii_digit())
        {
            MemberKind::Field(target.to_string())
        } else {
            MemberKind::Expression(target.to_string())
        };

        Self {
            kind,
            order,
            nulls: nulls.unwrap_or_else(|| order.default_nulls()),
            explicit_nulls: nulls.is_some(),
        }
    }
}

/// Index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexMethod {
    #[default]
    Btree,
    Hash,
    Gist,
    Gin,
    Spgist,
    Brin,
}

impl IndexMethod {
    /// The catalog name of the access method (`pg_am.amname`).
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMethod::Btree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gist => "gist",
            IndexMethod::Gin => "gin",
            IndexMethod::Spgist => "spgist",
            IndexMethod::Brin => "brin",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "btree" => Some(IndexMethod::Btree),
            "hash" => Some(IndexMethod::Hash),
            "gist" => Some(IndexMethod::Gist),
            "gin" => Some(IndexMethod::Gin),
            "spgist" => Some(IndexMethod::Spgist),
            "brin" => Some(IndexMethod::Brin),
            _ => None,
        }
    }
}

/// A database index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Members, in key order
    pub members: Vec<IndexMember>,
    /// Whether this is a unique index
    pub unique: bool,
    /// Access method
    pub method: IndexMethod,
    /// Optional WHERE clause for partial indexes
    pub condition: Option<String>,
}

impl Index {
    pub fn new(name: impl Into<String>, members: Vec<IndexMember>) -> Self {
        Self {
            name: name.into(),
            members,
            unique: false,
            method: IndexMethod::Btree,
            condition: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn using(mut self, method: IndexMethod) -> Self {
        self.method = method;
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether any member is an expression.
    pub fn has_expressions(&self) -> bool {
        self.members.iter().any(IndexMember::is_expression)
    }
}

// =============================================================================
// Constraints
// =============================================================================

/// Referential action for ON DELETE / ON UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FkAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Restrict => "RESTRICT",
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Constraint name
    pub name: String,
    /// Column(s) in this table
    pub fields: Vec<String>,
    /// Referenced table
    pub references: String,
    /// Referenced column(s); empty means the referenced table's primary key
    pub keys: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
    pub deferrable: bool,
}

impl ForeignKey {
    /// A key referencing the primary key of `references`.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<String>,
        references: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            fields,
            references: references.into(),
            keys: Vec::new(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
            deferrable: false,
        }
    }

    pub fn keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    pub fn on_delete(mut self, action: FkAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: FkAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    pub fn references_primary_key(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A table CHECK constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckConstraint {
    pub name: String,
    pub condition: String,
}

impl CheckConstraint {
    pub fn new(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: condition.into(),
        }
    }
}

// =============================================================================
// Tables, enums, extensions
// =============================================================================

/// A database table definition.
#[derive(Debug, Clone, Eq)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns, in declaration order
    pub fields: Vec<Field>,
    pub indices: Vec<Index>,
    pub checks: Vec<CheckConstraint>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indices: Vec::new(),
            checks: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    pub fn check(mut self, check: CheckConstraint) -> Self {
        self.checks.push(check);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indices.iter().find(|i| i.name == name)
    }

    pub fn get_check(&self, name: &str) -> Option<&CheckConstraint> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn get_foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|k| k.name == name)
    }

    /// Names of the primary key columns, in declaration order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Whether this table holds anything the engine rewrites on storage:
    /// expression index members, partial index conditions or check
    /// constraints.
    pub fn has_expressions(&self) -> bool {
        !self.checks.is_empty()
            || self
                .indices
                .iter()
                .any(|i| i.has_expressions() || i.condition.is_some())
    }
}

/// Fields compare in order; indices, checks and foreign keys compare as sets.
impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.fields == other.fields
            && same_set(&self.indices, &other.indices)
            && same_set(&self.checks, &other.checks)
            && same_set(&self.foreign_keys, &other.foreign_keys)
    }
}

fn same_set<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
}

/// A user-defined enum type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Enum {
    pub name: String,
    /// Labels, in sort order
    pub values: Vec<String>,
}

impl Enum {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// A database extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Extension {
    pub name: String,
}

impl Extension {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A complete database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    /// Tables, in declaration order
    pub tables: Vec<Table>,
    pub enums: Vec<Enum>,
    pub extensions: Vec<Extension>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// A schema holding only tables.
    pub fn with_tables(tables: Vec<Table>) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn enumeration(mut self, e: Enum) -> Self {
        self.enums.push(e);
        self
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn get_enum(&self, name: &str) -> Option<&Enum> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Reject duplicate names at every level.
    ///
    /// Callers must run this before diffing: a duplicate is reported, never
    /// resolved by picking one of the entries.
    pub fn check_names(&self) -> Result<(), PreconditionViolation> {
        if let Some(name) = first_duplicate(self.tables.iter().map(|t| t.name.as_str())) {
            return Err(PreconditionViolation::DuplicateTable(name.to_string()));
        }
        if let Some(name) = first_duplicate(self.enums.iter().map(|e| e.name.as_str())) {
            return Err(PreconditionViolation::DuplicateEnum(name.to_string()));
        }
        if let Some(name) = first_duplicate(self.extensions.iter().map(|e| e.name.as_str())) {
            return Err(PreconditionViolation::DuplicateExtension(name.to_string()));
        }

        for table in &self.tables {
            let duplicate = |kind: &'static str, name: &str| PreconditionViolation::Duplicate {
                kind,
                table: table.name.clone(),
                name: name.to_string(),
            };

            if let Some(name) = first_duplicate(table.fields.iter().map(|f| f.name.as_str())) {
                return Err(duplicate("field", name));
            }
            if let Some(name) = first_duplicate(table.indices.iter().map(|i| i.name.as_str())) {
                return Err(duplicate("index", name));
            }
            if let Some(name) = first_duplicate(table.checks.iter().map(|c| c.name.as_str())) {
                return Err(duplicate("check", name));
            }
            if let Some(name) =
                first_duplicate(table.foreign_keys.iter().map(|k| k.name.as_str()))
            {
                return Err(duplicate("foreign key", name));
            }
        }

        Ok(())
    }
}

fn first_duplicate<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = IndexSet::new();
    names.into_iter().find(|name| !seen.insert(*name))
}

/// A schema that violates the naming invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionViolation {
    #[error("table `{0}` is defined more than once")]
    DuplicateTable(String),

    #[error("enum `{0}` is defined more than once")]
    DuplicateEnum(String),

    #[error("extension `{0}` is listed more than once")]
    DuplicateExtension(String),

    #[error("{kind} `{name}` is defined more than once on table `{table}`")]
    Duplicate {
        kind: &'static str,
        table: String,
        name: String,
    },
}
