//! Round-trips against a real Postgres.
//!
//! Uses `DATABASE_URL` when set (the public schema is wiped, run with
//! `--test-threads=1`), otherwise starts one container per test.
//!
//! ```text
//! cargo test -p pgshape --features test-postgres
//! ```

#![cfg(feature = "test-postgres")]

use pgshape::{
    CheckConstraint, DefaultValue, Enum, Field, FieldType, ForeignKey, Index, IndexMember,
    MigrateOptions, Migrator, Postgres, Reader, Schema, Table, normalize,
};
use testcontainers_modules::postgres::Postgres as PostgresImage;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use tokio_postgres::NoTls;
use tracing_subscriber::EnvFilter;

struct TestDb {
    client: tokio_postgres::Client,
    _container: Option<ContainerAsync<PostgresImage>>,
}

async fn connect() -> TestDb {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pgshape=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();

    let _ = dotenvy::dotenv();
    let (url, container) = match std::env::var("DATABASE_URL") {
        Ok(url) => (url, None),
        Err(_) => {
            let container = PostgresImage::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            (
                format!("postgres://postgres:postgres@{host}:{port}/postgres"),
                Some(container),
            )
        }
    };

    let (client, connection) = tokio_postgres::connect(&url, NoTls).await.unwrap();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {e}");
        }
    });

    // start from an empty public schema
    client
        .batch_execute("DROP SCHEMA public CASCADE; CREATE SCHEMA public;")
        .await
        .unwrap();

    TestDb {
        client,
        _container: container,
    }
}

fn desired() -> Schema {
    Schema::new()
        .enumeration(Enum::new("role", ["admin", "member"]))
        .table(
            Table::new("users")
                .field(Field::new("id", FieldType::BigInt).primary_key())
                .field(Field::new("email", FieldType::Text).not_null())
                .field(
                    Field::new("role", FieldType::enumeration("role"))
                        .not_null()
                        .default(DefaultValue::literal("member")),
                )
                .field(
                    Field::new("created_at", FieldType::timestamptz())
                        .not_null()
                        .default(DefaultValue::expression("now()")),
                )
                .index(
                    Index::new("users_email", vec![IndexMember::expression("lower(email)")])
                        .unique(),
                )
                .index(Index::new(
                    "users_recent",
                    vec![IndexMember::field("created_at").desc()],
                ))
                .check(CheckConstraint::new("users_email_at", "email LIKE '%@%'")),
        )
        .table(
            Table::new("posts")
                .field(Field::new("id", FieldType::BigInt).primary_key())
                .field(Field::new("author", FieldType::BigInt).not_null())
                .field(Field::new("title", FieldType::varchar(200)).not_null())
                .field(Field::new("draft", FieldType::Boolean).not_null().default(DefaultValue::literal(true)))
                .index(
                    Index::new("posts_published", vec![IndexMember::field("author")])
                        .condition("NOT draft"),
                )
                .foreign_key(ForeignKey::new("posts_author", vec!["author".into()], "users")),
        )
}

#[tokio::test]
async fn test_apply_then_nothing_left() {
    let test = connect().await;
    let db = Postgres::new(&test.client);
    let migrator = Migrator::new(&db, MigrateOptions::default());

    let applied = migrator.apply(&desired()).await.unwrap();
    assert!(!applied.is_empty());

    let remaining = migrator.plan(&desired()).await.unwrap();
    assert!(remaining.is_empty(), "left over: {remaining:#?}");
}

#[tokio::test]
async fn test_alter_existing_schema() {
    let test = connect().await;
    let db = Postgres::new(&test.client);
    let migrator = Migrator::new(&db, MigrateOptions::default());
    migrator.apply(&desired()).await.unwrap();

    let mut next = desired();
    next.enums[0] = Enum::new("role", ["owner", "admin", "member"]);
    let posts = &mut next.tables[1];
    posts.fields.retain(|f| f.name != "draft");
    posts.fields.push(Field::new("body", FieldType::Text));
    posts.indices = vec![Index::new("posts_by_author", vec![IndexMember::field("author")])];

    let applied = migrator.apply(&next).await.unwrap();
    assert!(!applied.is_empty());
    assert!(migrator.plan(&next).await.unwrap().is_empty());

    let actual = db.read_schema().await.unwrap();
    assert_eq!(
        actual.get_enum("role").unwrap().values,
        vec!["owner", "admin", "member"]
    );
}

#[tokio::test]
async fn test_normalize_leaves_no_trace() {
    let test = connect().await;
    let db = Postgres::new(&test.client);

    let before = db.read_schema().await.unwrap();
    let normalized = normalize(&db, &desired()).await.unwrap();
    let after = db.read_schema().await.unwrap();

    assert_eq!(before, after);
    assert_eq!(normalized.tables.len(), 2);
    assert!(normalized.get_table("users").unwrap().get_index("users_email").is_some());
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let test = connect().await;
    let db = Postgres::new(&test.client);
    let options = MigrateOptions {
        dry_run: true,
        ..MigrateOptions::default()
    };

    let planned = Migrator::new(&db, options).apply(&desired()).await.unwrap();
    assert!(!planned.is_empty());
    assert_eq!(db.read_schema().await.unwrap(), Schema::new());
}

#[tokio::test]
async fn test_drop_primary_key_with_custom_name() {
    let test = connect().await;
    test.client
        .batch_execute("CREATE TABLE account (id bigint CONSTRAINT account_key PRIMARY KEY, name text)")
        .await
        .unwrap();
    let db = Postgres::new(&test.client);
    let migrator = Migrator::new(&db, MigrateOptions::default());

    let wanted = Schema::new().table(
        Table::new("account")
            .field(Field::new("id", FieldType::BigInt).not_null())
            .field(Field::new("name", FieldType::Text)),
    );
    migrator.apply(&wanted).await.unwrap();

    let actual = db.read_schema().await.unwrap();
    assert!(actual.get_table("account").unwrap().primary_key().is_empty());
}
