//! The migration pipeline: validate, read, normalize, diff, apply, verify.

use pgshape_schema::Schema;
use tracing::{info, warn};

use crate::db::{Reader, Runner, Transaction, Transactional};
use crate::{Change, ColumnRename, Error, Result, between_with_renames, normalize, validate};

/// How [`Migrator::apply`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Log every change before it runs
    pub log_changes: bool,
    /// Roll back instead of committing
    pub dry_run: bool,
    /// After committing, diff again and fail unless nothing is left
    pub post_check: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            log_changes: true,
            dry_run: false,
            post_check: true,
        }
    }
}

/// Brings a database in line with a desired [`Schema`].
///
/// ```ignore
/// let db = Postgres::new(&client);
/// let migrator = Migrator::new(&db, MigrateOptions::default());
/// for change in migrator.plan(&desired).await? {
///     println!("{change}");
/// }
/// migrator.apply(&desired).await?;
/// ```
pub struct Migrator<'a, D: ?Sized> {
    db: &'a D,
    options: MigrateOptions,
}

impl<'a, D> Migrator<'a, D>
where
    D: Reader + Runner + Transactional + ?Sized,
{
    pub fn new(db: &'a D, options: MigrateOptions) -> Self {
        Self { db, options }
    }

    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    /// The changes [`apply`](Self::apply) would run, without running them.
    pub async fn plan(&self, desired: &Schema) -> Result<Vec<Change>> {
        self.plan_with_renames(desired, &[]).await
    }

    pub async fn plan_with_renames(
        &self,
        desired: &Schema,
        renames: &[ColumnRename],
    ) -> Result<Vec<Change>> {
        desired.check_names()?;
        validate(desired)?;

        let actual = self.db.read_schema().await?;
        let desired = normalize(self.db, desired).await?;
        Ok(between_with_renames(&desired, &actual, renames)?)
    }

    /// Plan and run the changes in one transaction. Returns what was run.
    pub async fn apply(&self, desired: &Schema) -> Result<Vec<Change>> {
        self.apply_with_renames(desired, &[]).await
    }

    pub async fn apply_with_renames(
        &self,
        desired: &Schema,
        renames: &[ColumnRename],
    ) -> Result<Vec<Change>> {
        let changes = self.plan_with_renames(desired, renames).await?;
        if changes.is_empty() {
            info!("schema is up to date");
            return Ok(changes);
        }

        if self.options.log_changes {
            for change in &changes {
                info!("{change}");
            }
        }

        let tx = Transaction::begin(self.db).await?;
        if let Err(e) = tx.db().run(&changes).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed migration also failed");
            }
            return Err(e);
        }

        if self.options.dry_run {
            tx.rollback().await?;
            info!(count = changes.len(), "dry run, rolled back");
            return Ok(changes);
        }

        tx.commit().await?;
        info!(count = changes.len(), "applied changes");

        if self.options.post_check {
            let remaining = self.plan(desired).await?;
            if !remaining.is_empty() {
                return Err(Error::PostCheck {
                    remaining: remaining.iter().map(ToString::to_string).collect(),
                });
            }
        }

        Ok(changes)
    }
}
