use pgshape_schema::PreconditionViolation;
use thiserror::Error;

use crate::config::ConfigError;
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to normalize table `{table}`: {source}")]
    Normalization {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unexpected catalog contents: {0}")]
    Catalog(String),

    #[error("schema did not converge after applying changes:\n{}", .remaining.join("\n"))]
    PostCheck { remaining: Vec<String> },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn normalization(table: impl Into<String>, source: Error) -> Self {
        Error::Normalization {
            table: table.into(),
            source: Box::new(source),
        }
    }
}
