//! Baseline schema provisioning.
//!
//! Runs only when the sentinel table is missing entirely. The default
//! [`EmbeddedSchema`] executes the bundled baseline script; [`CommandSchema`]
//! hands off to an external schema tool instead.

use crate::db::DbPool;
use crate::error::{DbError, DbResult};
use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

const POSTGRES_BASELINE: &str = include_str!("../../schema/postgres.sql");
const SQLITE_BASELINE: &str = include_str!("../../schema/sqlite.sql");

/// Creates the baseline schema in an empty database.
pub trait SchemaProvisioner: Send + Sync {
    fn name(&self) -> &str;

    fn provision<'a>(&'a self, pool: &'a DbPool) -> BoxFuture<'a, DbResult<()>>;
}

/// Applies the bundled baseline schema in a single transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSchema;

impl EmbeddedSchema {
    pub fn script_for(pool: &DbPool) -> &'static str {
        match pool {
            DbPool::Postgres(_) => POSTGRES_BASELINE,
            DbPool::SQLite(_) => SQLITE_BASELINE,
        }
    }
}

impl SchemaProvisioner for EmbeddedSchema {
    fn name(&self) -> &str {
        "embedded"
    }

    fn provision<'a>(&'a self, pool: &'a DbPool) -> BoxFuture<'a, DbResult<()>> {
        async move {
            let mut tx = pool.begin().await?;
            if let Err(e) = tx.execute_script(Self::script_for(pool)).await {
                tx.rollback().await?;
                return Err(DbError::schema(
                    format!("baseline schema failed: {}", e),
                    "plans",
                ));
            }
            tx.commit().await?;
            info!(db_type = %pool.db_type(), "Baseline schema created");
            Ok(())
        }
        .boxed()
    }
}

/// Runs an external schema tool through the shell, e.g. `prisma db push`.
///
/// The tool receives the connection string in `DATABASE_URL`.
#[derive(Debug, Clone)]
pub struct CommandSchema {
    command: String,
    database_url: String,
}

impl CommandSchema {
    pub fn new(command: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            database_url: database_url.into(),
        }
    }
}

impl SchemaProvisioner for CommandSchema {
    fn name(&self) -> &str {
        &self.command
    }

    fn provision<'a>(&'a self, _pool: &'a DbPool) -> BoxFuture<'a, DbResult<()>> {
        async move {
            info!(command = %self.command, "Running schema command");
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&self.command)
                .env("DATABASE_URL", &self.database_url)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| DbError::io(format!("spawning '{}'", self.command), e))?;

            debug!(
                stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                "Schema command output"
            );
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DbError::schema(
                    format!(
                        "schema command '{}' exited with {}: {}",
                        self.command,
                        output.status,
                        stderr.trim()
                    ),
                    "plans",
                ));
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baselines_create_sentinel_table() {
        assert!(POSTGRES_BASELINE.contains("CREATE TABLE IF NOT EXISTS plans"));
        assert!(SQLITE_BASELINE.contains("CREATE TABLE IF NOT EXISTS plans"));
        assert!(SQLITE_BASELINE.contains("AUTOINCREMENT"));
        assert!(POSTGRES_BASELINE.contains("SERIAL"));
    }

    #[test]
    fn test_command_schema_name() {
        let schema = CommandSchema::new("prisma db push", "postgres://localhost/cv");
        assert_eq!(schema.name(), "prisma db push");
    }
}
