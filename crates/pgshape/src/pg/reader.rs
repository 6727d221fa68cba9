//! Catalog introspection.
//!
//! Reads `pg_catalog` directly rather than `information_schema`: index
//! options, expression members and canonical expression text are only
//! available there.

use pgshape_schema::{
    CheckConstraint, DefaultValue, Enum, Extension, Field, FieldType, FkAction, ForeignKey, Index,
    IndexMember, IndexMethod, Table, TypeAttrs, UnknownType,
};

use crate::{Connection, ConnectionExt, Error, Result};

const TABLE_NAMES: &str = r#"
    SELECT c.relname::text
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = 'public'
      AND c.relkind IN ('r', 'p')
      AND NOT c.relispartition
    ORDER BY c.relname
"#;

const TABLE_OID: &str = r#"
    SELECT c.oid
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = 'public'
      AND c.relkind IN ('r', 'p')
      AND c.relname = $1
"#;

const COLUMNS: &str = r#"
    SELECT
        a.attname::text,
        pg_catalog.format_type(a.atttypid, a.atttypmod),
        COALESCE(et.typtype, t.typtype) = 'e' AS is_enum,
        a.attnotnull,
        pg_catalog.pg_get_expr(d.adbin, d.adrelid),
        EXISTS (
            SELECT 1 FROM pg_catalog.pg_index i
            WHERE i.indrelid = a.attrelid
              AND i.indisprimary
              AND a.attnum = ANY(i.indkey)
        ) AS primary_key
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
    LEFT JOIN pg_catalog.pg_type et ON et.oid = t.typelem AND t.typcategory = 'A'
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE a.attrelid = $1
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const INDICES: &str = r#"
    SELECT
        i.relname::text,
        ix.indisunique,
        am.amname::text,
        ix.indnkeyatts,
        ix.indkey::int2[],
        ix.indoption::int2[],
        ARRAY(
            SELECT pg_catalog.pg_get_indexdef(ix.indexrelid, k, true)
            FROM generate_series(1, ix.indnatts) AS k
            ORDER BY k
        ),
        pg_catalog.pg_get_expr(ix.indpred, ix.indrelid, true)
    FROM pg_catalog.pg_index ix
    JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
    JOIN pg_catalog.pg_am am ON am.oid = i.relam
    WHERE ix.indrelid = $1
      AND NOT ix.indisprimary
    ORDER BY i.relname
"#;

const FOREIGN_KEYS: &str = r#"
    SELECT
        c.conname::text,
        ARRAY(
            SELECT a.attname::text
            FROM unnest(c.conkey) WITH ORDINALITY AS k(attnum, n)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
            ORDER BY k.n
        ),
        r.relname::text,
        ARRAY(
            SELECT a.attname::text
            FROM unnest(c.confkey) WITH ORDINALITY AS k(attnum, n)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.confrelid AND a.attnum = k.attnum
            ORDER BY k.n
        ),
        ARRAY(
            SELECT a.attname::text
            FROM pg_catalog.pg_index i
            CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, n)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
            WHERE i.indrelid = c.confrelid AND i.indisprimary
            ORDER BY k.n
        ),
        c.confdeltype::text,
        c.confupdtype::text,
        c.condeferrable
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class r ON r.oid = c.confrelid
    WHERE c.conrelid = $1
      AND c.contype = 'f'
    ORDER BY c.conname
"#;

const CHECKS: &str = r#"
    SELECT c.conname::text, pg_catalog.pg_get_expr(c.conbin, c.conrelid, true)
    FROM pg_catalog.pg_constraint c
    WHERE c.conrelid = $1
      AND c.contype = 'c'
    ORDER BY c.conname
"#;

const ENUMS: &str = r#"
    SELECT
        t.typname::text,
        ARRAY(
            SELECT e.enumlabel::text
            FROM pg_catalog.pg_enum e
            WHERE e.enumtypid = t.oid
            ORDER BY e.enumsortorder
        )
    FROM pg_catalog.pg_type t
    JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
    WHERE n.nspname = 'public'
      AND t.typtype = 'e'
    ORDER BY t.typname
"#;

const EXTENSIONS: &str = r#"
    SELECT extname::text
    FROM pg_catalog.pg_extension
    WHERE extname <> 'plpgsql'
    ORDER BY extname
"#;

/// `pg_index.indoption` bits.
const INDOPTION_DESC: i16 = 0x0001;
const INDOPTION_NULLS_FIRST: i16 = 0x0002;

pub(super) async fn table_names<C: Connection + ?Sized>(conn: &C) -> Result<Vec<String>> {
    let rows = conn.traced().query(TABLE_NAMES, &[]).await?;
    rows.iter()
        .map(|row| Ok(row.try_get(0)?))
        .collect()
}

pub(super) async fn table<C: Connection + ?Sized>(conn: &C, name: &str) -> Result<Option<Table>> {
    let conn = conn.traced();

    let rows = conn.query(TABLE_OID, &[&name]).await?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let oid: u32 = row.try_get(0)?;

    let mut table = Table::new(name);

    for row in conn.query(COLUMNS, &[&oid]).await? {
        let column: String = row.try_get(0)?;
        let ty: String = row.try_get(1)?;
        let is_enum: bool = row.try_get(2)?;
        let not_null: bool = row.try_get(3)?;
        let default: Option<String> = row.try_get(4)?;
        let primary_key: bool = row.try_get(5)?;

        let ty = parse_type(&ty, is_enum).map_err(|e| {
            Error::Catalog(format!("column `{}`.`{}`: {}", name, column, e))
        })?;
        table.fields.push(Field {
            name: column,
            ty,
            nullable: !not_null,
            default: default.as_deref().map(parse_default),
            primary_key,
        });
    }

    for row in conn.query(INDICES, &[&oid]).await? {
        let index_name: String = row.try_get(0)?;
        let unique: bool = row.try_get(1)?;
        let method: String = row.try_get(2)?;
        let key_count: i16 = row.try_get(3)?;
        let keys: Vec<i16> = row.try_get(4)?;
        let options: Vec<i16> = row.try_get(5)?;
        let definitions: Vec<String> = row.try_get(6)?;
        let condition: Option<String> = row.try_get(7)?;

        let method = IndexMethod::from_name(&method).ok_or_else(|| {
            Error::Catalog(format!(
                "index `{}` uses unsupported access method `{}`",
                index_name, method
            ))
        })?;

        let members = keys
            .iter()
            .zip(&definitions)
            .take(key_count.max(0) as usize)
            .enumerate()
            .map(|(i, (attnum, definition))| {
                index_member(*attnum, definition, options.get(i).copied().unwrap_or(0))
            })
            .collect();

        table.indices.push(Index {
            name: index_name,
            members,
            unique,
            method,
            condition,
        });
    }

    for row in conn.query(FOREIGN_KEYS, &[&oid]).await? {
        let key_name: String = row.try_get(0)?;
        let fields: Vec<String> = row.try_get(1)?;
        let references: String = row.try_get(2)?;
        let keys: Vec<String> = row.try_get(3)?;
        let primary_key: Vec<String> = row.try_get(4)?;
        let on_delete: String = row.try_get(5)?;
        let on_update: String = row.try_get(6)?;
        let deferrable: bool = row.try_get(7)?;

        table.foreign_keys.push(ForeignKey {
            name: key_name,
            fields,
            references,
            // A key over the referenced primary key is read as implicit.
            keys: if keys == primary_key { Vec::new() } else { keys },
            on_delete: fk_action(&on_delete)?,
            on_update: fk_action(&on_update)?,
            deferrable,
        });
    }

    for row in conn.query(CHECKS, &[&oid]).await? {
        table.checks.push(CheckConstraint {
            name: row.try_get(0)?,
            condition: row.try_get(1)?,
        });
    }

    Ok(Some(table))
}

pub(super) async fn enums<C: Connection + ?Sized>(conn: &C) -> Result<Vec<Enum>> {
    let rows = conn.traced().query(ENUMS, &[]).await?;
    rows.iter()
        .map(|row| {
            Ok(Enum {
                name: row.try_get(0)?,
                values: row.try_get(1)?,
            })
        })
        .collect()
}

pub(super) async fn extensions<C: Connection + ?Sized>(conn: &C) -> Result<Vec<Extension>> {
    let rows = conn.traced().query(EXTENSIONS, &[]).await?;
    rows.iter()
        .map(|row| Ok(Extension::new(row.try_get::<_, String>(0)?)))
        .collect()
}

fn index_member(attnum: i16, definition: &str, option: i16) -> IndexMember {
    let mut member = if attnum == 0 {
        IndexMember::expression(definition)
    } else {
        IndexMember::field(unquote_ident(definition))
    };
    if option & INDOPTION_DESC != 0 {
        member = member.desc();
    }
    if option & INDOPTION_NULLS_FIRST != 0 {
        member.nulls_first()
    } else {
        member.nulls_last()
    }
}

fn fk_action(code: &str) -> Result<FkAction> {
    match code {
        "a" => Ok(FkAction::NoAction),
        "r" => Ok(FkAction::Restrict),
        "c" => Ok(FkAction::Cascade),
        "n" => Ok(FkAction::SetNull),
        "d" => Ok(FkAction::SetDefault),
        other => Err(Error::Catalog(format!(
            "unknown foreign key action code `{}`",
            other
        ))),
    }
}

fn unquote_ident(ident: &str) -> String {
    match ident
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => ident.to_string(),
    }
}

/// Map `format_type` output to a [`FieldType`] through the type registry.
///
/// `is_enum` says whether the (element) type is a user-defined enum, which
/// `format_type` alone can't tell apart from other named types.
pub fn parse_type(spec: &str, is_enum: bool) -> std::result::Result<FieldType, UnknownType> {
    let spec = spec.trim();

    if let Some(element) = spec.strip_suffix("[]") {
        let element = parse_type(element, is_enum)?;
        return FieldType::build("array", &TypeAttrs::new().element(element));
    }

    if is_enum {
        return FieldType::build("enum", &TypeAttrs::new().name(unquote_ident(spec)));
    }

    // "timestamp(3) with time zone" -> ("timestamp with time zone", [3])
    let (base, args) = match (spec.find('('), spec.find(')')) {
        (Some(open), Some(close)) if open < close => {
            let base = format!("{} {}", spec[..open].trim(), spec[close + 1..].trim());
            let args = spec[open + 1..close]
                .split(',')
                .map(|a| a.trim().parse::<u32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| UnknownType::Tag(spec.to_string()))?;
            (base.trim().to_string(), args)
        }
        _ => (spec.to_string(), Vec::new()),
    };
    let first = args.first().copied();

    let (tag, attrs) = match base.as_str() {
        "smallint" => ("smallint", TypeAttrs::new()),
        "integer" => ("integer", TypeAttrs::new()),
        "bigint" => ("bigint", TypeAttrs::new()),
        "real" => ("real", TypeAttrs::new()),
        "double precision" => ("double", TypeAttrs::new()),
        "numeric" => (
            "numeric",
            TypeAttrs {
                precision: first,
                scale: args.get(1).copied(),
                ..TypeAttrs::new()
            },
        ),
        "boolean" => ("boolean", TypeAttrs::new()),
        "character" => (
            "char",
            TypeAttrs {
                length: first,
                ..TypeAttrs::new()
            },
        ),
        "character varying" => (
            "varchar",
            TypeAttrs {
                length: first,
                ..TypeAttrs::new()
            },
        ),
        "text" => ("text", TypeAttrs::new()),
        "bytea" => ("bytea", TypeAttrs::new()),
        "date" => ("date", TypeAttrs::new()),
        "time without time zone" => ("time", precision(first)),
        "time with time zone" => ("timetz", precision(first)),
        "timestamp without time zone" => ("timestamp", precision(first)),
        "timestamp with time zone" => ("timestamptz", precision(first)),
        "interval" => ("interval", TypeAttrs::new()),
        "uuid" => ("uuid", TypeAttrs::new()),
        "json" => ("json", TypeAttrs::new()),
        "jsonb" => ("jsonb", TypeAttrs::new()),
        "inet" => ("inet", TypeAttrs::new()),
        "cidr" => ("cidr", TypeAttrs::new()),
        "macaddr" => ("macaddr", TypeAttrs::new()),
        _ => return Err(UnknownType::Tag(spec.to_string())),
    };
    FieldType::build(tag, &attrs)
}

fn precision(precision: Option<u32>) -> TypeAttrs {
    TypeAttrs {
        precision,
        ..TypeAttrs::new()
    }
}

/// Classify a column default as printed by `pg_get_expr`.
///
/// - `nextval('seq'::regclass)` is a sequence
/// - a quoted string with an optional cast, a number, `true` or `false` is a literal
/// - anything else is an expression
pub fn parse_default(expr: &str) -> DefaultValue {
    let expr = expr.trim();

    if let Some(name) = expr
        .strip_prefix("nextval('")
        .and_then(|rest| rest.strip_suffix("'::regclass)"))
    {
        return DefaultValue::Sequence(name.replace("''", "'"));
    }

    if let Some(value) = quoted_literal(expr) {
        return DefaultValue::Literal(value);
    }

    if expr == "true" || expr == "false" || expr.parse::<f64>().is_ok() {
        return DefaultValue::Literal(expr.to_string());
    }

    DefaultValue::Expression(expr.to_string())
}

/// `'it''s'::text` -> `it's`; `None` unless the whole expression is one
/// string literal, optionally followed by a cast.
fn quoted_literal(expr: &str) -> Option<String> {
    let body = expr.strip_prefix('\'')?;
    let mut value = String::new();
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '\'' {
            value.push(c);
            continue;
        }
        if let Some((_, '\'')) = chars.peek() {
            chars.next();
            value.push('\'');
            continue;
        }
        let rest = &body[i + 1..];
        let is_cast = rest.is_empty()
            || rest.strip_prefix("::").is_some_and(|ty| {
                !ty.is_empty()
                    && ty.chars().all(|c| {
                        c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '[' | ']' | '"')
                    })
            });
        return is_cast.then_some(value);
    }

    None
}
