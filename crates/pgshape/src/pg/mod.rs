//! [`Reader`], [`Runner`] and [`Transactional`] against a live Postgres.
//!
//! Only the `public` namespace is read or written.

use pgshape_schema::{Enum, Extension, Schema, Table};

use crate::db::{Reader, Runner, Transactional};
use crate::{BoxFuture, Change, Connection, ConnectionExt, Result};

mod reader;

pub use reader::{parse_default, parse_type};

/// A Postgres database reached through a borrowed connection.
///
/// # Example
///
/// ```ignore
/// let client = pool.get().await?;
/// let db = pgshape::Postgres::new(&client);
/// let actual = db.read_schema().await?;
/// ```
pub struct Postgres<'a, C: Connection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: Connection + ?Sized> Postgres<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'a C {
        self.conn
    }
}

impl<C: Connection + ?Sized> Reader for Postgres<'_, C> {
    fn read_schema(&self) -> BoxFuture<'_, Result<Schema>> {
        Box::pin(async move {
            let mut tables = Vec::new();
            for name in reader::table_names(self.conn).await? {
                if let Some(table) = reader::table(self.conn, &name).await? {
                    tables.push(table);
                }
            }
            Ok(Schema {
                tables,
                enums: reader::enums(self.conn).await?,
                extensions: reader::extensions(self.conn).await?,
            })
        })
    }

    fn read_table<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Table>>> {
        Box::pin(reader::table(self.conn, name))
    }

    fn read_enums(&self) -> BoxFuture<'_, Result<Vec<Enum>>> {
        Box::pin(reader::enums(self.conn))
    }

    fn read_extensions(&self) -> BoxFuture<'_, Result<Vec<Extension>>> {
        Box::pin(reader::extensions(self.conn))
    }
}

impl<C: Connection + ?Sized> Runner for Postgres<'_, C> {
    fn run<'a>(&'a self, changes: &'a [Change]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.traced();
            for change in changes {
                for statement in change.to_sql() {
                    conn.batch_execute(&statement).await?;
                }
            }
            Ok(())
        })
    }
}

impl<C: Connection + ?Sized> Transactional for Postgres<'_, C> {
    fn begin(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(self.conn.traced().batch_execute("BEGIN").await?) })
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(self.conn.traced().batch_execute("COMMIT").await?) })
    }

    fn rollback(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(self.conn.traced().batch_execute("ROLLBACK").await?) })
    }
}
