//! The seams between the engine and a live database.
//!
//! Nothing in pgshape holds a global connection: the normalizer and the
//! migration pipeline take a handle implementing these traits. [`Postgres`]
//! is the real implementation; tests substitute an in-memory one.
//!
//! [`Postgres`]: crate::Postgres

use pgshape_schema::{Enum, Extension, Schema, Table};

use crate::{BoxFuture, Change, Result};

/// Reads the current schema out of the database catalog.
pub trait Reader: Send + Sync {
    /// Read every table, enum and extension.
    fn read_schema(&self) -> BoxFuture<'_, Result<Schema>>;

    /// Read a single table, or `None` if it doesn't exist.
    fn read_table<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<Table>>>;

    fn read_enums(&self) -> BoxFuture<'_, Result<Vec<Enum>>>;

    fn read_extensions(&self) -> BoxFuture<'_, Result<Vec<Extension>>>;
}

/// Applies changes, in the given order.
pub trait Runner: Send + Sync {
    fn run<'a>(&'a self, changes: &'a [Change]) -> BoxFuture<'a, Result<()>>;
}

/// A handle that can open and close a transaction.
///
/// Use [`Transaction`] rather than calling these directly.
pub trait Transactional: Send + Sync {
    fn begin(&self) -> BoxFuture<'_, Result<()>>;
    fn commit(&self) -> BoxFuture<'_, Result<()>>;
    fn rollback(&self) -> BoxFuture<'_, Result<()>>;
}

/// An open transaction.
///
/// Must be finished with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Dropping it unfinished leaves the connection
/// inside the transaction and logs a warning.
pub struct Transaction<'a, T: Transactional + ?Sized> {
    db: &'a T,
    finished: bool,
}

impl<'a, T: Transactional + ?Sized> Transaction<'a, T> {
    pub async fn begin(db: &'a T) -> Result<Self> {
        db.begin().await?;
        Ok(Self {
            db,
            finished: false,
        })
    }

    /// The handle this transaction runs on.
    pub fn db(&self) -> &'a T {
        self.db
    }

    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.db.commit().await
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.db.rollback().await
    }
}

impl<T: Transactional + ?Sized> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("transaction dropped without commit or rollback");
        }
    }
}
