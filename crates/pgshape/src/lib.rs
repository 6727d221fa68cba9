//! Declarative schema migrations for Postgres.
//!
//! Describe the schema you want as a [`Schema`] value; pgshape reads the live
//! schema, compares the two and produces an ordered list of [`Change`]s that
//! turns one into the other.
//!
//! ```ignore
//! let desired = Schema::new().table(
//!     Table::new("users")
//!         .field(Field::new("id", FieldType::BigInt).primary_key())
//!         .field(Field::new("email", FieldType::Text).not_null())
//!         .index(Index::new("users_email", vec![IndexMember::expression("lower(email)")]).unique()),
//! );
//!
//! let db = Postgres::new(&client);
//! let applied = Migrator::new(&db, MigrateOptions::default()).apply(&desired).await?;
//! ```
//!
//! The pieces are usable on their own: [`between`] is a pure differ,
//! [`validate`] checks a desired schema for dangling references, and
//! [`normalize`] round-trips tables through the database so that expressions
//! compare in their stored form.

use std::future::Future;
use std::pin::Pin;

mod changes;
pub mod config;
mod db;
mod diff;
mod error;
mod migrate;
mod normalize;
mod pg;
pub mod sql;
mod traced;
mod validate;

#[cfg(test)]
mod fake;

pub use changes::{Change, FieldChange, IndexChange};
pub use config::{Config, ConfigError};
pub use db::{Reader, Runner, Transaction, Transactional};
pub use diff::{ColumnRename, between, between_with_renames};
pub use error::Error;
pub use migrate::{MigrateOptions, Migrator};
pub use normalize::normalize;
pub use pg::{Postgres, parse_default, parse_type};
pub use traced::{Connection, ConnectionExt, TracedConn};
pub use validate::{ValidationError, Violation, is_valid, validate};

pub use pgshape_schema::*;

/// Result type for pgshape operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed future returned by the database seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
