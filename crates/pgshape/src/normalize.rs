//! Canonicalize tables whose definitions contain expressions.
//!
//! Postgres stores index expressions, partial-index predicates and check
//! conditions in its own rewritten form: `lower(email)` comes back as
//! `lower((email)::text)`, `age > 0` as `(age > 0)`. A declared definition
//! therefore never equals what the catalog reports. To compare them, each such
//! table is created under a temporary name, read back through the catalog, and
//! the read form is used in place of the declared one.
//!
//! Everything happens inside a single transaction that is always rolled back,
//! so the database is left exactly as it was.

use indexmap::IndexMap;
use pgshape_schema::{Index, Schema, Table};
use tracing::debug;

use crate::db::{Reader, Runner, Transaction, Transactional};
use crate::{Change, Error, Result};

/// Postgres identifier limit, in bytes.
const MAX_IDENT_LEN: usize = 63;

/// Hex characters of the content hash kept in temporary names.
const HASH_LEN: usize = 10;

/// Replace every table of `schema` that has expressions by its round-tripped
/// form. Tables without expressions, enums and extensions are returned as is.
///
/// Missing extensions and enums are created first so that the temporary
/// tables can use them; they are rolled back with everything else.
pub async fn normalize<D>(db: &D, schema: &Schema) -> Result<Schema>
where
    D: Reader + Runner + Transactional + ?Sized,
{
    if !schema.tables.iter().any(Table::has_expressions) {
        return Ok(schema.clone());
    }

    let tx = Transaction::begin(db).await?;
    let result = round_trip(tx.db(), schema).await;
    let rollback = tx.rollback().await;

    match (result, rollback) {
        (Ok(schema), Ok(())) => Ok(schema),
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
    }
}

async fn round_trip<D>(db: &D, schema: &Schema) -> Result<Schema>
where
    D: Reader + Runner + ?Sized,
{
    let extensions = db.read_extensions().await?;
    let enums = db.read_enums().await?;

    let mut prerequisites = Vec::new();
    for extension in &schema.extensions {
        if !extensions.iter().any(|e| e.name == extension.name) {
            prerequisites.push(Change::CreateExtension(extension.name.clone()));
        }
    }
    for e in &schema.enums {
        if !enums.iter().any(|present| present.name == e.name) {
            prerequisites.push(Change::CreateEnum(e.clone()));
        }
    }
    if !prerequisites.is_empty() {
        db.run(&prerequisites).await?;
    }

    let mut tables = Vec::with_capacity(schema.tables.len());
    for table in &schema.tables {
        if table.has_expressions() {
            let normalized = round_trip_table(db, table)
                .await
                .map_err(|e| Error::normalization(&table.name, e))?;
            tables.push(normalized);
        } else {
            tables.push(table.clone());
        }
    }

    Ok(Schema {
        tables,
        enums: schema.enums.clone(),
        extensions: schema.extensions.clone(),
    })
}

async fn round_trip_table<D>(db: &D, table: &Table) -> Result<Table>
where
    D: Reader + Runner + ?Sized,
{
    let hash = content_hash(table);
    let temp = suffixed(&table.name, &hash);
    debug!(table = %table.name, temp = %temp, "normalizing");

    // temporary index name -> declared index name
    let mut index_names = IndexMap::new();
    let indices: Vec<Index> = table
        .indices
        .iter()
        .map(|index| {
            let name = suffixed(&index.name, &hash);
            index_names.insert(name.clone(), index.name.clone());
            Index {
                name,
                ..index.clone()
            }
        })
        .collect();

    db.run(&[Change::CreateTable {
        name: temp.clone(),
        fields: table.fields.clone(),
        indices,
        checks: table.checks.clone(),
    }])
    .await?;

    let read = db
        .read_table(&temp)
        .await?
        .ok_or_else(|| Error::Catalog(format!("temporary table `{temp}` not found")))?;

    db.run(&[Change::DropTable(temp.clone())]).await?;

    let indices = read
        .indices
        .into_iter()
        .map(|index| match index_names.get(&index.name) {
            Some(declared) => Ok(Index {
                name: declared.clone(),
                ..index
            }),
            None => Err(Error::Catalog(format!(
                "unexpected index `{}` on temporary table `{temp}`",
                index.name
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Table {
        name: table.name.clone(),
        fields: read.fields,
        indices,
        checks: read.checks,
        foreign_keys: table.foreign_keys.clone(),
    })
}

/// Stable hash over the table's name, field names, index names and check
/// names. Index and check names are sorted; field order is significant.
fn content_hash(table: &Table) -> String {
    let mut indices: Vec<&str> = table.indices.iter().map(|i| i.name.as_str()).collect();
    indices.sort_unstable();
    let mut checks: Vec<&str> = table.checks.iter().map(|c| c.name.as_str()).collect();
    checks.sort_unstable();

    let parts: Vec<&str> = std::iter::once(table.name.as_str())
        .chain(table.fields.iter().map(|f| f.name.as_str()))
        .chain(indices)
        .chain(checks)
        .collect();

    let hash = blake3::hash(parts.join(",").as_bytes());
    hash.to_hex().as_str()[..HASH_LEN].to_string()
}

/// `<name>_<hash>`, fitting an identifier.
///
/// Names too long for that are cut, and the suffix becomes a hash of the
/// full name and `hash`, so names sharing a long prefix stay distinct.
fn suffixed(name: &str, hash: &str) -> String {
    if name.len() + hash.len() < MAX_IDENT_LEN {
        return format!("{}_{}", name, hash);
    }

    let digest = blake3::hash(format!("{},{}", name, hash).as_bytes()).to_hex();
    let mut end = MAX_IDENT_LEN - HASH_LEN - 1;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}_{}", &name[..end], &digest.as_str()[..HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Event, FakeDb};
    use pgshape_schema::{CheckConstraint, Enum, Field, FieldType, ForeignKey, IndexMember};

    fn users() -> Table {
        Table::new("users")
            .field(Field::new("id", FieldType::BigInt).primary_key())
            .field(Field::new("email", FieldType::Text).not_null())
            .index(Index::new("users_email", vec![IndexMember::expression("lower(email)")]).unique())
            .check(CheckConstraint::new("users_email_len", "length(email) > 3"))
    }

    #[tokio::test]
    async fn test_expressions_take_stored_form() {
        let db = FakeDb::new(Schema::new());
        let schema = Schema::new().table(users());

        let normalized = normalize(&db, &schema).await.unwrap();
        let table = normalized.get_table("users").unwrap();

        let index = table.get_index("users_email").unwrap();
        assert_eq!(
            index.members,
            vec![IndexMember::expression("(lower(email))")]
        );
        assert!(index.unique);
        assert_eq!(
            table.get_check("users_email_len").unwrap().condition,
            "(length(email) > 3)"
        );
        assert_eq!(table.fields, users().fields);
    }

    #[tokio::test]
    async fn test_normalizing_twice_is_stable() {
        let db = FakeDb::new(Schema::new());
        let schema = Schema::new().table(users());

        let once = normalize(&db, &schema).await.unwrap();
        let twice = normalize(&db, &once).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_leaves_database_untouched() {
        let existing = Schema::new().table(Table::new("other").field(Field::new("id", FieldType::Integer)));
        let db = FakeDb::new(existing.clone());

        normalize(&db, &Schema::new().table(users())).await.unwrap();

        assert_eq!(db.schema(), existing);
        let events = db.events();
        assert_eq!(events.first(), Some(&Event::Begin));
        assert_eq!(events.last(), Some(&Event::Rollback));
        assert!(!events.contains(&Event::Commit));
    }

    #[tokio::test]
    async fn test_temporary_table_is_dropped() {
        let db = FakeDb::new(Schema::new());
        normalize(&db, &Schema::new().table(users())).await.unwrap();

        let runs: Vec<Change> = db
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Run(changes) => Some(changes),
                _ => None,
            })
            .flatten()
            .collect();

        let temp = format!("users_{}", content_hash(&users()));
        assert!(matches!(&runs[0], Change::CreateTable { name, .. } if *name == temp));
        assert_eq!(runs[1], Change::DropTable(temp));
    }

    #[tokio::test]
    async fn test_tables_without_expressions_skip_the_database() {
        let plain = Table::new("plain")
            .field(Field::new("id", FieldType::Integer).primary_key())
            .index(Index::new("plain_id", vec![IndexMember::field("id").desc()]));
        let db = FakeDb::new(Schema::new());
        let schema = Schema::new().table(plain);

        let normalized = normalize(&db, &schema).await.unwrap();
        assert_eq!(normalized, schema);
        assert!(db.events().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_keys_are_reattached() {
        let posts = Table::new("posts")
            .field(Field::new("id", FieldType::BigInt).primary_key())
            .field(Field::new("author", FieldType::BigInt))
            .index(Index::new("posts_recent", vec![IndexMember::field("id")]).condition("author IS NOT NULL"))
            .foreign_key(ForeignKey::new("posts_author", vec!["author".into()], "users"));
        let db = FakeDb::new(Schema::new());

        let normalized = normalize(&db, &Schema::new().table(posts.clone())).await.unwrap();
        let table = normalized.get_table("posts").unwrap();
        assert_eq!(table.foreign_keys, posts.foreign_keys);
        assert_eq!(
            table.get_index("posts_recent").unwrap().condition.as_deref(),
            Some("(author IS NOT NULL)")
        );
    }

    #[tokio::test]
    async fn test_missing_enums_are_created_inside_the_transaction() {
        let mood = Enum::new("mood", ["happy", "sad"]);
        let table = Table::new("people")
            .field(Field::new("mood", FieldType::Enum("mood".into())))
            .check(CheckConstraint::new("people_mood", "mood <> 'sad'"));
        let db = FakeDb::new(Schema::new());
        let schema = Schema::new().enumeration(mood.clone()).table(table);

        normalize(&db, &schema).await.unwrap();

        assert!(db.events().contains(&Event::Run(vec![Change::CreateEnum(mood)])));
        assert!(db.schema().enums.is_empty());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_names_the_table() {
        let broken = Table::new("broken")
            .field(Field::new("id", FieldType::Integer))
            .index(Index::new("broken_idx", vec![IndexMember::expression("bogus(id)")]));
        let db = FakeDb::new(Schema::new()).failing_on("bogus");

        let err = normalize(&db, &Schema::new().table(broken)).await.unwrap_err();
        assert!(matches!(&err, Error::Normalization { table, .. } if table == "broken"));
        assert_eq!(db.events().last(), Some(&Event::Rollback));
        assert_eq!(db.schema(), Schema::new());
    }

    #[test]
    fn test_content_hash_ignores_index_order() {
        let a = Table::new("t")
            .field(Field::new("a", FieldType::Text))
            .index(Index::new("i1", vec![IndexMember::field("a")]))
            .index(Index::new("i2", vec![IndexMember::expression("upper(a)")]));
        let b = Table::new("t")
            .field(Field::new("a", FieldType::Text))
            .index(Index::new("i2", vec![IndexMember::expression("upper(a)")]))
            .index(Index::new("i1", vec![IndexMember::field("a")]));

        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), HASH_LEN);
        assert_ne!(content_hash(&a), content_hash(&Table::new("t")));
    }

    #[test]
    fn test_suffixed_fits_identifier_limit() {
        let long = "x".repeat(80);
        let name = suffixed(&long, "0123456789");
        assert_eq!(name.len(), MAX_IDENT_LEN);
        assert!(name.starts_with(&"x".repeat(52)));
        assert_eq!(name, suffixed(&long, "0123456789"));
        assert_ne!(name, suffixed(&long, "9876543210"));

        assert_eq!(suffixed("users", "abc"), "users_abc");
        let fits = "y".repeat(MAX_IDENT_LEN - 11);
        assert_eq!(suffixed(&fits, "0123456789"), format!("{fits}_0123456789"));
        assert!(suffixed(&"é".repeat(40), "0123456789").len() <= MAX_IDENT_LEN);
    }

    #[test]
    fn test_suffixed_keeps_long_names_apart() {
        let prefix = "orders_by_customer_region_and_fulfilment_center_and";
        let a = suffixed(&format!("{prefix}_created_at"), "0123456789");
        let b = suffixed(&format!("{prefix}_updated_at"), "0123456789");
        assert_ne!(a, b);
        assert_eq!(a.len(), MAX_IDENT_LEN);
        assert_eq!(b.len(), MAX_IDENT_LEN);
    }

    #[tokio::test]
    async fn test_long_index_names_sharing_a_prefix() {
        let prefix = "x".repeat(60);
        let first = format!("{prefix}_lower");
        let second = format!("{prefix}_upper");
        let table = Table::new("docs")
            .field(Field::new("title", FieldType::Text))
            .index(Index::new(&first, vec![IndexMember::expression("lower(title)")]))
            .index(Index::new(&second, vec![IndexMember::expression("upper(title)")]));
        let db = FakeDb::new(Schema::new());

        let normalized = normalize(&db, &Schema::new().table(table)).await.unwrap();
        let docs = normalized.get_table("docs").unwrap();
        assert_eq!(docs.indices.len(), 2);
        assert_eq!(
            docs.get_index(&first).unwrap().members,
            vec![IndexMember::expression("(lower(title))")]
        );
        assert_eq!(
            docs.get_index(&second).unwrap().members,
            vec![IndexMember::expression("(upper(title))")]
        );
    }
}
