//! First-start database bootstrap.
//!
//! [`Initializer::initialize`] makes a fresh database usable and is a no-op
//! on later starts:
//!
//! 1. connectivity probe (failure ends the run, no retry)
//! 2. baseline schema when the `plans` sentinel table is absent, then pending
//!    migrations
//! 3. best-effort runtime tuning for the environment
//! 4. seed data from [`SeedCategory::ALL`]
//!
//! Failures never escape as errors; the caller gets an [`InitOutcome`] and
//! decides whether to abort startup.

pub mod password;
pub mod provision;
pub mod seed;

use crate::config::{Environment, InitArgs};
use crate::db::retry::DEFAULT_MAX_RETRIES;
use crate::db::schema::quote_identifier;
use crate::db::{DbPool, PoolManager, RetryPolicy, SchemaInspector};
use crate::error::{DbError, DbResult};
use crate::migrate::{MigrateOptions, Migrator};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use password::{hash_password, verify_password};
pub use provision::{CommandSchema, EmbeddedSchema, SchemaProvisioner};
pub use seed::{AdminSeed, PLANS, PlanSeed, SeedCategory, seed_admin, seed_plans};

/// Table whose absence means the schema was never created.
pub const SENTINEL_TABLE: &str = "plans";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub skip_plans: bool,
    pub skip_admin: bool,
    pub skip_migrations: bool,
    pub force_migrations: bool,
    pub retry_on_failure: bool,
    /// Total attempts when `retry_on_failure` is set.
    pub max_retries: u32,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            skip_plans: false,
            skip_admin: false,
            skip_migrations: false,
            force_migrations: false,
            retry_on_failure: true,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl From<&InitArgs> for InitOptions {
    fn from(args: &InitArgs) -> Self {
        Self {
            skip_plans: args.skip_plans,
            skip_admin: args.skip_admin,
            skip_migrations: args.skip_migrations,
            force_migrations: args.force_migrations,
            retry_on_failure: !args.no_retry,
            max_retries: args.max_retries,
        }
    }
}

impl InitOptions {
    fn skips(&self, category: SeedCategory) -> bool {
        match category {
            SeedCategory::Plans => self.skip_plans,
            SeedCategory::Admin => self.skip_admin,
        }
    }
}

/// What a successful bootstrap did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub schema_provisioned: bool,
    pub migrations_applied: Vec<String>,
    /// Pending migrations were left alone by the production guard.
    pub migrations_blocked: bool,
    pub tuning_warnings: Vec<String>,
    pub plans_seeded: usize,
    pub admin_seeded: bool,
    pub attempts: u32,
}

#[derive(Debug)]
pub enum InitOutcome {
    Ready(InitReport),
    Failed { attempts: u32, error: DbError },
}

impl InitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

pub struct Initializer {
    manager: Arc<PoolManager>,
    migrator: Migrator,
    provisioner: Box<dyn SchemaProvisioner>,
    admin: AdminSeed,
}

impl std::fmt::Debug for Initializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initializer")
            .field("migrator", &self.migrator)
            .field("provisioner", &self.provisioner.name())
            .field("admin", &self.admin)
            .finish()
    }
}

impl Initializer {
    pub fn new(manager: Arc<PoolManager>, migrator: Migrator) -> Self {
        Self {
            manager,
            migrator,
            provisioner: Box::new(EmbeddedSchema),
            admin: AdminSeed::default(),
        }
    }

    pub fn with_provisioner(mut self, provisioner: impl SchemaProvisioner + 'static) -> Self {
        self.provisioner = Box::new(provisioner);
        self
    }

    pub fn with_admin(mut self, admin: AdminSeed) -> Self {
        self.admin = admin;
        self
    }

    pub async fn initialize(&self, options: &InitOptions) -> InitOutcome {
        if let Err(e) = self.manager.probe().await {
            error!(error = %e, "Database unreachable, aborting bootstrap");
            return InitOutcome::Failed {
                attempts: 1,
                error: e,
            };
        }

        let max_attempts = if options.retry_on_failure {
            options.max_retries.max(1)
        } else {
            1
        };
        let policy = RetryPolicy::new(max_attempts);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(options).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    info!(
                        attempt,
                        schema_provisioned = report.schema_provisioned,
                        migrations = report.migrations_applied.len(),
                        plans = report.plans_seeded,
                        admin = report.admin_seeded,
                        "Database bootstrap complete"
                    );
                    return InitOutcome::Ready(report);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Bootstrap attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Database bootstrap failed");
                    return InitOutcome::Failed {
                        attempts: attempt,
                        error: e,
                    };
                }
            }
        }
    }

    async fn attempt(&self, options: &InitOptions) -> DbResult<InitReport> {
        let mut report = InitReport::default();
        let pool = self.manager.pool().await?;

        if !SchemaInspector::table_exists(&pool, SENTINEL_TABLE).await? {
            info!(provisioner = self.provisioner.name(), "Schema missing, provisioning");
            self.provisioner.provision(&pool).await?;
            if !SchemaInspector::table_exists(&pool, SENTINEL_TABLE).await? {
                return Err(DbError::schema(
                    format!(
                        "provisioner '{}' finished without creating the schema",
                        self.provisioner.name()
                    ),
                    SENTINEL_TABLE,
                ));
            }
            report.schema_provisioned = true;
        }

        if !options.skip_migrations {
            let migrate_options = MigrateOptions {
                force: options.force_migrations,
                ..MigrateOptions::default()
            };
            match self.migrator.apply(&migrate_options).await {
                Ok(applied) => report.migrations_applied = applied,
                Err(DbError::ProductionMigrationBlocked) => {
                    warn!("Pending migrations not applied in production without --force-migrations");
                    report.migrations_blocked = true;
                }
                Err(e) => return Err(e),
            }
        }

        report.tuning_warnings = tune(&pool, self.manager.environment()).await;

        for category in SeedCategory::ALL {
            if options.skips(category) {
                info!(%category, "Seeding skipped");
                continue;
            }
            match category {
                SeedCategory::Plans => report.plans_seeded = seed_plans(&pool).await?,
                SeedCategory::Admin => report.admin_seeded = seed_admin(&pool, &self.admin).await?,
            }
        }

        Ok(report)
    }
}

/// Database-level settings applied by `ALTER DATABASE` on PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningProfile {
    pub statement_timeout: &'static str,
    pub idle_in_transaction_session_timeout: &'static str,
    pub work_mem: &'static str,
}

impl TuningProfile {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self {
                statement_timeout: "15s",
                idle_in_transaction_session_timeout: "60s",
                work_mem: "16MB",
            },
            Environment::Development | Environment::Test => Self {
                statement_timeout: "60s",
                idle_in_transaction_session_timeout: "5min",
                work_mem: "4MB",
            },
        }
    }

    fn statements(&self, database: &str) -> Vec<String> {
        let database = quote_identifier(database);
        [
            ("statement_timeout", self.statement_timeout),
            (
                "idle_in_transaction_session_timeout",
                self.idle_in_transaction_session_timeout,
            ),
            ("work_mem", self.work_mem),
        ]
        .into_iter()
        .map(|(setting, value)| format!("ALTER DATABASE {} SET {} = '{}'", database, setting, value))
        .collect()
    }
}

/// Apply runtime tuning. Failures are returned as warnings, never errors.
async fn tune(pool: &DbPool, environment: Environment) -> Vec<String> {
    let statements = match pool {
        DbPool::Postgres(p) => {
            match sqlx::query_scalar::<_, String>("SELECT current_database()")
                .fetch_one(p)
                .await
            {
                Ok(database) => TuningProfile::for_environment(environment).statements(&database),
                Err(e) => return vec![format!("could not resolve current database: {}", e)],
            }
        }
        DbPool::SQLite(_) => vec![
            "PRAGMA journal_mode = WAL".to_string(),
            "PRAGMA optimize".to_string(),
        ],
    };

    let mut warnings = Vec::new();
    for sql in &statements {
        if let Err(e) = pool.execute(sql).await {
            warn!(statement = %sql, error = %e, "Runtime tuning skipped");
            warnings.push(format!("{}: {}", sql, e));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_args() {
        let args = InitArgs {
            skip_admin: true,
            no_retry: true,
            max_retries: 5,
            ..InitArgs::default()
        };
        let options = InitOptions::from(&args);
        assert!(options.skip_admin);
        assert!(!options.skip_plans);
        assert!(!options.retry_on_failure);
        assert_eq!(options.max_retries, 5);
    }

    #[test]
    fn test_default_options_retry() {
        let options = InitOptions::default();
        assert!(options.retry_on_failure);
        assert_eq!(options.max_retries, 3);
        assert!(!options.skips(SeedCategory::Plans));
    }

    #[test]
    fn test_tuning_statements_quote_database() {
        let profile = TuningProfile::for_environment(Environment::Production);
        let statements = profile.statements("cv\"db");
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[0],
            "ALTER DATABASE \"cv\"\"db\" SET statement_timeout = '15s'"
        );
        assert!(statements[2].ends_with("work_mem = '16MB'"));
    }

    #[test]
    fn test_tuning_is_stricter_in_production() {
        let dev = TuningProfile::for_environment(Environment::Development);
        let prod = TuningProfile::for_environment(Environment::Production);
        assert_ne!(dev, prod);
        assert_eq!(TuningProfile::for_environment(Environment::Test), dev);
    }
}
