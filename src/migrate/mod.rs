//! Schema migrations.
//!
//! Migration files are applied in file-name order, each in its own
//! transaction together with its `schema_migrations` record, so a migration is
//! either fully applied and recorded or not at all. Runs stop at the first
//! failure. Concurrent runners are arbitrated by the unique `version` column:
//! the loser's insert fails and its transaction rolls back.

pub mod files;

use crate::db::{DbPool, DbTransaction, PoolManager, SchemaInspector};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{MigrationFile, MigrationRecord, MigrationStatus};
use chrono::{NaiveDateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

pub use files::{discover, migration_file_name, parse_migration_name, slugify};

pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Per-run switches for [`Migrator`].
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Report pending migrations without touching the database.
    pub dry_run: bool,
    /// Acknowledge running in production.
    pub force: bool,
    /// Overrides the migrator's `require_force` setting for this run.
    pub require_force: Option<bool>,
    /// Per-migration timeout; defaults to the pool profile's.
    pub timeout: Option<Duration>,
}

impl MigrateOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Migrator {
    manager: Arc<PoolManager>,
    dir: PathBuf,
    require_force: bool,
}

impl Migrator {
    pub fn new(manager: Arc<PoolManager>, dir: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            dir: dir.into(),
            require_force: true,
        }
    }

    /// Whether production runs need `force`.
    pub fn with_require_force(mut self, require_force: bool) -> Self {
        self.require_force = require_force;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the bookkeeping table if it does not exist.
    pub async fn ensure_metadata_table(&self) -> DbResult<()> {
        let pool = self.manager.pool().await?;
        let sql = match &pool {
            DbPool::Postgres(_) => queries::postgres::CREATE_MIGRATIONS_TABLE,
            DbPool::SQLite(_) => queries::sqlite::CREATE_MIGRATIONS_TABLE,
        };

        match pool.execute(sql).await {
            Ok(_) => Ok(()),
            // A concurrent creator can win the race even with IF NOT EXISTS.
            Err(e @ DbError::Database { .. }) => {
                if SchemaInspector::table_exists(&pool, MIGRATIONS_TABLE).await? {
                    debug!(error = %e, "Migrations table created concurrently");
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Applied migrations, ascending. Empty when the table does not exist yet.
    pub async fn list_applied(&self) -> DbResult<Vec<MigrationRecord>> {
        let pool = self.manager.pool().await?;
        if !SchemaInspector::table_exists(&pool, MIGRATIONS_TABLE).await? {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, NaiveDateTime)> = impl_db_dispatch!(DbPool: &pool, {
            Postgres(p) => sqlx::query_as(queries::postgres::LIST_APPLIED).fetch_all(p).await?,
            SQLite(p) => sqlx::query_as(queries::sqlite::LIST_APPLIED).fetch_all(p).await?,
        });

        Ok(rows
            .into_iter()
            .map(|(version, applied_at)| MigrationRecord {
                version,
                applied_at: applied_at.and_utc(),
            })
            .collect())
    }

    /// Migration files not yet recorded, in application order.
    ///
    /// A missing directory is created (except in dry run) and yields nothing.
    pub async fn list_pending(&self, options: &MigrateOptions) -> DbResult<Vec<MigrationFile>> {
        if !self.ensure_dir(options.dry_run).await? {
            return Ok(Vec::new());
        }

        let applied: HashSet<String> = self
            .list_applied()
            .await?
            .into_iter()
            .map(|r| r.version)
            .collect();

        let pending: Vec<MigrationFile> = discover(&self.dir)
            .await?
            .into_iter()
            .filter(|f| !applied.contains(&f.version))
            .collect();
        debug!(pending = pending.len(), applied = applied.len(), "Computed pending migrations");
        Ok(pending)
    }

    /// Apply every pending migration in order and return the applied versions.
    ///
    /// In dry run, returns the pending versions without touching the database.
    pub async fn apply(&self, options: &MigrateOptions) -> DbResult<Vec<String>> {
        if options.dry_run {
            let pending = self.list_pending(options).await?;
            for file in &pending {
                info!(version = %file.version, "Would apply migration");
            }
            return Ok(pending.into_iter().map(|f| f.version).collect());
        }

        self.check_production_guard(options)?;
        self.ensure_metadata_table().await?;

        let pending = self.list_pending(options).await?;
        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(Vec::new());
        }

        // Read everything up front so a missing file aborts before any transaction.
        let mut scripts = Vec::with_capacity(pending.len());
        for file in pending {
            let sql = tokio::fs::read_to_string(&file.path)
                .await
                .map_err(|e| DbError::io(format!("reading {}", file.path.display()), e))?;
            scripts.push((file, sql));
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.manager.settings().migration_timeout);
        let pool = self.manager.pool().await?;
        let mut applied = Vec::with_capacity(scripts.len());

        for (file, sql) in scripts {
            let version = file.version;
            info!(version = %version, "Applying migration");
            let started = Instant::now();

            let mut tx = pool
                .begin()
                .await
                .map_err(|e| DbError::migration(&version, e.to_string()))?;

            // The server-side limit aborts a runaway statement so the
            // rollback below does not queue behind it.
            let outcome = tokio::time::timeout(timeout, async {
                tx.set_local_statement_timeout(timeout.as_millis()).await?;
                tx.execute_script(&sql).await?;
                record_migration(&mut tx, &version).await
            })
            .await
            .unwrap_or_else(|_| Err(DbError::timeout(format!("migration {}", version), timeout)));

            if let Err(e) = outcome {
                error!(version = %version, error = %e, "Migration failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(version = %version, error = %rollback_err, "Rollback failed");
                }
                return Err(DbError::migration(version, e.to_string()));
            }

            tx.commit()
                .await
                .map_err(|e| DbError::migration(&version, e.to_string()))?;
            info!(
                version = %version,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Migration applied"
            );
            applied.push(version);
        }

        info!(count = applied.len(), "Migrations complete");
        Ok(applied)
    }

    /// Applied and pending migrations, for `migrate status`.
    pub async fn status(&self) -> DbResult<MigrationStatus> {
        let applied = self.list_applied().await?;
        let pending = self
            .list_pending(&MigrateOptions::dry_run())
            .await?
            .into_iter()
            .map(|f| f.version)
            .collect();
        Ok(MigrationStatus { applied, pending })
    }

    fn check_production_guard(&self, options: &MigrateOptions) -> DbResult<()> {
        let require_force = options.require_force.unwrap_or(self.require_force);
        if self.manager.environment().is_production() && !options.force && require_force {
            warn!("Refusing to run migrations in production without --force");
            return Err(DbError::ProductionMigrationBlocked);
        }
        Ok(())
    }

    /// Returns whether the directory exists afterwards.
    async fn ensure_dir(&self, dry_run: bool) -> DbResult<bool> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(true),
            Ok(_) => Err(DbError::config(format!(
                "Migrations path {} is not a directory",
                self.dir.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !dry_run {
                    tokio::fs::create_dir_all(&self.dir)
                        .await
                        .map_err(|e| DbError::io(format!("creating {}", self.dir.display()), e))?;
                    info!(dir = %self.dir.display(), "Created migrations directory");
                }
                Ok(false)
            }
            Err(e) => Err(DbError::io(format!("reading {}", self.dir.display()), e)),
        }
    }
}

/// Write `<YYYYMMDDHHMMSS>_<slug>.sql` with a header comment into `dir`.
///
/// Never overwrites an existing file.
pub async fn create_migration(dir: &Path, name: &str) -> DbResult<PathBuf> {
    let now = Utc::now();
    let file_name = migration_file_name(now, name)?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DbError::io(format!("creating {}", dir.display()), e))?;

    let path = dir.join(&file_name);
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                DbError::migration(&file_name, "a migration with this name already exists")
            } else {
                DbError::io(format!("creating {}", path.display()), e)
            }
        })?;

    file.write_all(files::template(name, now).as_bytes())
        .await
        .map_err(|e| DbError::io(format!("writing {}", path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| DbError::io(format!("writing {}", path.display()), e))?;

    info!(path = %path.display(), "Created migration");
    Ok(path)
}

async fn record_migration(tx: &mut DbTransaction, version: &str) -> DbResult<()> {
    let result = impl_db_dispatch!(DbTransaction: tx, {
        Postgres(tx) => sqlx::query(queries::postgres::INSERT_MIGRATION)
            .bind(version)
            .execute(&mut **tx)
            .await
            .map(|_| ()),
        SQLite(tx) => sqlx::query(queries::sqlite::INSERT_MIGRATION)
            .bind(version)
            .execute(&mut **tx)
            .await
            .map(|_| ()),
    });
    result.map_err(DbError::from)
}

mod queries {
    pub mod postgres {
        pub const CREATE_MIGRATIONS_TABLE: &str = r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                id SERIAL PRIMARY KEY,
                version VARCHAR(255) UNIQUE NOT NULL,
                applied_at TIMESTAMP NOT NULL DEFAULT NOW()
            )
        "#;

        pub const LIST_APPLIED: &str =
            "SELECT version, applied_at FROM schema_migrations ORDER BY version";

        pub const INSERT_MIGRATION: &str = "INSERT INTO schema_migrations (version) VALUES ($1)";
    }

    pub mod sqlite {
        pub const CREATE_MIGRATIONS_TABLE: &str = r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version VARCHAR(255) UNIQUE NOT NULL,
                applied_at TIMESTAMP NOT NULL DEFAULT (datetime('now'))
            )
        "#;

        pub const LIST_APPLIED: &str =
            "SELECT version, applied_at FROM schema_migrations ORDER BY version";

        pub const INSERT_MIGRATION: &str = "INSERT INTO schema_migrations (version) VALUES (?)";
    }
}
