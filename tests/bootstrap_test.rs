//! Integration tests for the bootstrap initializer against SQLite files.
//!
//! Tests verify that:
//! - A fresh database gets schema, migrations, plans and an admin account
//! - Running the initializer again changes nothing
//! - Skip flags and a missing admin password are honored
//! - Probe failures end immediately while later failures are retried

use cv_dbkit::bootstrap::{
    AdminSeed, CommandSchema, InitOptions, InitOutcome, Initializer, SchemaProvisioner,
    verify_password,
};
use cv_dbkit::config::{DatabaseConfig, Environment, PoolSettings};
use cv_dbkit::db::DbPool;
use cv_dbkit::error::{DbError, DbResult};
use cv_dbkit::migrate::Migrator;
use cv_dbkit::PoolManager;
use futures_util::future::{BoxFuture, FutureExt};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const ADMIN_EMAIL: &str = "admin@cv.test";
const ADMIN_PASSWORD: &str = "correct horse battery staple";

fn repo_migrations() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

fn manager(dir: &TempDir) -> Arc<PoolManager> {
    let url = format!("sqlite://{}", dir.path().join("cv.db").display());
    let config = DatabaseConfig::parse(&url).unwrap();
    PoolManager::new(config, PoolSettings::for_environment(Environment::Test, 2))
}

fn initializer(manager: &Arc<PoolManager>, password: Option<&str>) -> Initializer {
    Initializer::new(manager.clone(), Migrator::new(manager.clone(), repo_migrations())).with_admin(
        AdminSeed {
            email: ADMIN_EMAIL.to_string(),
            password: password.map(str::to_string),
        },
    )
}

async fn count(pool: &DbPool, sql: &str) -> i64 {
    match pool {
        DbPool::SQLite(p) => sqlx::query_scalar(sql).fetch_one(p).await.unwrap(),
        DbPool::Postgres(p) => sqlx::query_scalar(sql).fetch_one(p).await.unwrap(),
    }
}

fn ready(outcome: InitOutcome) -> cv_dbkit::bootstrap::InitReport {
    match outcome {
        InitOutcome::Ready(report) => report,
        InitOutcome::Failed { attempts, error } => {
            panic!("bootstrap failed after {attempts} attempt(s): {error}")
        }
    }
}

#[tokio::test]
async fn test_fresh_database_is_bootstrapped() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);

    let report = ready(
        initializer(&manager, Some(ADMIN_PASSWORD))
            .initialize(&InitOptions::default())
            .await,
    );
    assert!(report.schema_provisioned);
    assert_eq!(
        report.migrations_applied,
        vec!["20250101000000_index_users_plan_id.sql"]
    );
    assert_eq!(report.plans_seeded, 4);
    assert!(report.admin_seeded);
    assert_eq!(report.attempts, 1);
    assert!(report.tuning_warnings.is_empty(), "{:?}", report.tuning_warnings);

    let pool = manager.pool().await.unwrap();
    let (hash, plan): (String, String) = match &pool {
        DbPool::SQLite(p) => sqlx::query_as(
            "SELECT u.password_hash, p.name FROM users u JOIN plans p ON p.id = u.plan_id WHERE u.role = 'admin'",
        )
        .fetch_one(p)
        .await
        .unwrap(),
        DbPool::Postgres(_) => unreachable!(),
    };
    assert_eq!(plan, "enterprise");
    assert!(verify_password(ADMIN_PASSWORD, &hash).unwrap());

    let unlimited = count(&pool, "SELECT COUNT(*) FROM plans WHERE scan_limit IS NULL").await;
    assert_eq!(unlimited, 1);
    manager.close().await;
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    let init = initializer(&manager, Some(ADMIN_PASSWORD));

    ready(init.initialize(&InitOptions::default()).await);
    let pool = manager.pool().await.unwrap();
    let plans = count(&pool, "SELECT COUNT(*) FROM plans").await;
    let users = count(&pool, "SELECT COUNT(*) FROM users").await;

    let again = ready(init.initialize(&InitOptions::default()).await);
    assert!(!again.schema_provisioned);
    assert!(again.migrations_applied.is_empty());
    assert_eq!(again.plans_seeded, 0);
    assert!(!again.admin_seeded);

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM plans").await, plans);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await, users);
    assert_eq!(plans, 4);
    assert_eq!(users, 1);
    manager.close().await;
}

#[tokio::test]
async fn test_skip_flags_leave_tables_empty() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    let options = InitOptions {
        skip_plans: true,
        skip_admin: true,
        skip_migrations: true,
        ..InitOptions::default()
    };

    let report = ready(
        initializer(&manager, Some(ADMIN_PASSWORD))
            .initialize(&options)
            .await,
    );
    assert!(report.schema_provisioned);
    assert!(report.migrations_applied.is_empty());
    assert_eq!(report.plans_seeded, 0);
    assert!(!report.admin_seeded);

    let pool = manager.pool().await.unwrap();
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM plans").await, 0);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await, 0);
    manager.close().await;
}

#[tokio::test]
async fn test_admin_skipped_without_password() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);

    let report = ready(initializer(&manager, None).initialize(&InitOptions::default()).await);
    assert_eq!(report.plans_seeded, 4);
    assert!(!report.admin_seeded);

    let pool = manager.pool().await.unwrap();
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await, 0);
    manager.close().await;
}

#[tokio::test]
async fn test_unreachable_database_fails_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!(
        "sqlite://{}",
        dir.path().join("missing").join("nested").join("cv.db").display()
    );
    let config = DatabaseConfig::parse(&url).unwrap();
    let manager = PoolManager::new(config, PoolSettings::for_environment(Environment::Test, 2));

    let outcome = initializer(&manager, None)
        .initialize(&InitOptions::default())
        .await;
    match outcome {
        InitOutcome::Failed { attempts, .. } => assert_eq!(attempts, 1),
        InitOutcome::Ready(_) => panic!("bootstrap should not succeed"),
    }
    manager.close().await;
}

/// Provisioner that reports success without creating anything.
struct NoopSchema;

impl SchemaProvisioner for NoopSchema {
    fn name(&self) -> &str {
        "noop"
    }

    fn provision<'a>(&'a self, _pool: &'a DbPool) -> BoxFuture<'a, DbResult<()>> {
        async { Ok(()) }.boxed()
    }
}

#[tokio::test]
async fn test_failed_attempts_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    let options = InitOptions {
        max_retries: 2,
        ..InitOptions::default()
    };

    let outcome = initializer(&manager, None)
        .with_provisioner(NoopSchema)
        .initialize(&options)
        .await;
    match outcome {
        InitOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 2);
            assert!(matches!(error, DbError::Schema { .. }), "unexpected error: {error:?}");
        }
        InitOutcome::Ready(_) => panic!("bootstrap should not succeed"),
    }
    manager.close().await;
}

#[tokio::test]
async fn test_no_retry_stops_after_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir);
    let options = InitOptions {
        retry_on_failure: false,
        ..InitOptions::default()
    };

    let outcome = initializer(&manager, None)
        .with_provisioner(CommandSchema::new(
            "echo schema tool failed >&2; exit 3",
            "sqlite://unused.db",
        ))
        .initialize(&options)
        .await;
    match outcome {
        InitOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 1);
            assert!(error.to_string().contains("schema tool failed"), "{error}");
        }
        InitOutcome::Ready(_) => panic!("bootstrap should not succeed"),
    }
    manager.close().await;
}
