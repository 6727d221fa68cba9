//! Traced database connection wrapper.
//!
//! Every statement pgshape sends goes through [`TracedConn`], which wraps it
//! in a `tracing` span carrying the SQL text.

use std::future::Future;
use std::pin::Pin;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::Instrument;

type PgFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Catalog queries take a handful of parameters at most.
pub type Params<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Something pgshape can send SQL to.
///
/// Implemented for `tokio_postgres::Client` and `deadpool_postgres::Object`.
/// Only two operations are needed: parameterized reads of the catalog, and
/// DDL through the simple query protocol.
pub trait Connection: Send + Sync {
    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> PgFuture<'a, Vec<Row>>;

    fn batch_execute<'a>(&'a self, sql: &'a str) -> PgFuture<'a, ()>;
}

impl Connection for tokio_postgres::Client {
    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> PgFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> PgFuture<'a, ()> {
        Box::pin(tokio_postgres::Client::batch_execute(self, sql))
    }
}

impl Connection for deadpool_postgres::Object {
    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> PgFuture<'a, Vec<Row>> {
        Connection::query(client(self), sql, params)
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> PgFuture<'a, ()> {
        Connection::batch_execute(client(self), sql)
    }
}

fn client(object: &deadpool_postgres::Object) -> &tokio_postgres::Client {
    object
}

/// A borrowed connection whose statements are logged via tracing.
///
/// ```ignore
/// use pgshape::ConnectionExt;
///
/// let conn = pool.get().await?;
/// conn.traced().batch_execute("ALTER TABLE \"user\" ADD COLUMN \"bio\" text").await?;
/// ```
pub struct TracedConn<'a, C: Connection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: Connection + ?Sized> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Run a query, returning all rows.
    pub async fn query(&self, sql: &str, params: Params<'_>) -> Result<Vec<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .conn
            .query(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Run one statement without parameters.
    pub async fn batch_execute(&self, sql: &str) -> Result<(), Error> {
        let span = tracing::debug_span!("db.execute", sql = %sql);
        self.conn.batch_execute(sql).instrument(span).await
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection {
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection + ?Sized> ConnectionExt for C {}
