//! Backend-specific transactions.
//!
//! Migrations and schema provisioning run each script inside a transaction so
//! that the script and its bookkeeping commit or roll back together.

use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::DatabaseType;
use futures_util::future::{BoxFuture, FutureExt};
use sqlx::{Executor, PgConnection, Postgres, Sqlite, SqliteConnection, Transaction};

/// Transaction wrapper for the supported database types.
pub enum DbTransaction {
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Run a script that may contain several statements.
    ///
    /// The script is sent without bind parameters, so both backends accept
    /// multiple `;`-separated statements. The future is built against the
    /// concrete connection type of each variant so it stays `Send` inside
    /// boxed callers such as schema provisioners.
    pub fn execute_script<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, DbResult<u64>> {
        match self {
            DbTransaction::Postgres(tx) => {
                let conn: &'a mut PgConnection = &mut **tx;
                conn.execute(sql)
                    .map(|r| r.map(|r| r.rows_affected()).map_err(DbError::from))
                    .boxed()
            }
            DbTransaction::SQLite(tx) => {
                let conn: &'a mut SqliteConnection = &mut **tx;
                conn.execute(sql)
                    .map(|r| r.map(|r| r.rows_affected()).map_err(DbError::from))
                    .boxed()
            }
        }
    }

    /// Bound every statement in this transaction on the server side.
    ///
    /// PostgreSQL only; SQLite has no per-statement timeout and relies on the
    /// caller's timer.
    pub async fn set_local_statement_timeout(&mut self, limit_ms: u128) -> DbResult<()> {
        if let DbTransaction::Postgres(_) = self {
            self.execute_script(&format!("SET LOCAL statement_timeout = '{}ms'", limit_ms))
                .await?;
        }
        Ok(())
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction: self, |tx| tx.commit().await.map_err(DbError::from))
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction: self, |tx| tx.rollback().await.map_err(DbError::from))
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTransaction")
            .field("db_type", &self.db_type())
            .finish_non_exhaustive()
    }
}
