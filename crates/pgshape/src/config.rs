//! Configuration file handling for pgshape.
//!
//! Looks for `.config/pgshape.styx` in the current directory or any parent
//! directory. `DATABASE_URL` (from the environment or a `.env` file) takes
//! precedence over the file's `database_url`.

use camino::{Utf8Path, Utf8PathBuf};
use facet::Facet;

use crate::MigrateOptions;

/// Location of the config file, relative to a project directory.
pub const CONFIG_FILE: &str = ".config/pgshape.styx";

/// Contents of `.config/pgshape.styx`.
///
/// ```text
/// database_url "postgres://localhost/app"
/// dry_run true
/// ```
#[derive(Facet, Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Connection string
    #[facet(default)]
    pub database_url: Option<String>,

    /// Log every change before applying it (default: true)
    #[facet(default)]
    pub log_changes: Option<bool>,

    /// Roll the migration back instead of committing it (default: false)
    #[facet(default)]
    pub dry_run: Option<bool>,

    /// Re-read and re-diff after applying (default: true)
    #[facet(default)]
    pub post_check: Option<bool>,
}

impl Config {
    /// Parse a config from Styx source.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        facet_styx::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `DATABASE_URL`, loading `.env` first if there is one.
    pub fn with_env(mut self) -> Self {
        let _ = dotenvy::dotenv();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        self
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    pub fn migrate_options(&self) -> MigrateOptions {
        let defaults = MigrateOptions::default();
        MigrateOptions {
            log_changes: self.log_changes.unwrap_or(defaults.log_changes),
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
            post_check: self.post_check.unwrap_or(defaults.post_check),
        }
    }
}

/// Load configuration from `.config/pgshape.styx`, searching up the directory
/// tree, then apply the environment.
pub fn load() -> Result<(Config, Utf8PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| ConfigError::Io(e.to_string()))?;
    let (config, path) = load_from(&cwd)?;
    Ok((config.with_env(), path))
}

/// Load configuration starting from a specific directory.
///
/// The environment is not consulted.
pub fn load_from(start: &Utf8Path) -> Result<(Config, Utf8PathBuf), ConfigError> {
    let config_path = find_config_file(start)?;
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;
    Ok((Config::parse(&content)?, config_path))
}

/// Find `.config/pgshape.styx` by searching up the directory tree.
fn find_config_file(start: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Build a connection pool for the configured database.
pub fn create_pool(config: &Config) -> Result<deadpool_postgres::Pool, ConfigError> {
    let pool_config = deadpool_postgres::Config {
        url: Some(config.database_url()?.to_string()),
        ..Default::default()
    };
    pool_config
        .create_pool(
            Some(deadpool_postgres::Runtime::Tokio1),
            tokio_postgres::NoTls,
        )
        .map_err(|e| ConfigError::Pool(e.to_string()))
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no {CONFIG_FILE} found in current directory or any parent")]
    NotFound,

    #[error("failed to read {CONFIG_FILE}: {0}")]
    Io(String),

    #[error("failed to parse {CONFIG_FILE}: {0}")]
    Parse(String),

    #[error("no database URL: set DATABASE_URL or database_url in {CONFIG_FILE}")]
    MissingDatabaseUrl,

    #[error("failed to create connection pool: {0}")]
    Pool(String),
}
