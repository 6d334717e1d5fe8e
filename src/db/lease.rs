//! Exclusively owned pool connections.
//!
//! A [`Lease`] remembers the pool generation it was taken from. Once the pool
//! is reset or closed the generation moves on and the lease refuses to run
//! anything, so no statement can straddle a reset. Leases that saw a
//! connection-class error are closed instead of going back to the pool.

use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::DatabaseType;
use sqlx::pool::PoolConnection;
use sqlx::{Postgres, Sqlite};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// A pooled connection for one of the supported backends.
#[derive(Debug)]
pub enum LeasedConnection {
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl LeasedConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            LeasedConnection::Postgres(_) => DatabaseType::PostgreSQL,
            LeasedConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    fn close_on_drop(&mut self) {
        impl_db_dispatch!(LeasedConnection: self, |c| c.close_on_drop())
    }
}

pub struct Lease {
    conn: Option<LeasedConnection>,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    broken: bool,
    acquired_at: Instant,
}

impl Lease {
    pub(crate) fn new(
        conn: LeasedConnection,
        generation: u64,
        current_generation: Arc<AtomicU64>,
    ) -> Self {
        Self {
            conn: Some(conn),
            generation,
            current_generation,
            broken: false,
            acquired_at: Instant::now(),
        }
    }

    /// Pool generation this lease was taken from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// True once the pool this lease came from has been reset or closed.
    pub fn is_stale(&self) -> bool {
        self.current_generation.load(Ordering::Acquire) != self.generation
    }

    /// True if the connection will be closed rather than returned to the pool.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn db_type(&self) -> Option<DatabaseType> {
        self.conn.as_ref().map(LeasedConnection::db_type)
    }

    /// Borrow the underlying connection for arbitrary sqlx queries.
    ///
    /// Fails with [`DbError::StaleLease`] when the pool has moved on.
    pub fn connection(&mut self) -> DbResult<&mut LeasedConnection> {
        let current = self.current_generation.load(Ordering::Acquire);
        if current != self.generation {
            self.broken = true;
            return Err(DbError::StaleLease {
                lease_generation: self.generation,
                current_generation: current,
            });
        }
        self.conn.as_mut().ok_or(DbError::PoolClosed)
    }

    /// Run a (possibly multi-statement) script and return the affected row count.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let conn = self.connection()?;
        let result = impl_db_dispatch!(LeasedConnection: conn, |c| {
            sqlx::raw_sql(sql)
                .execute(&mut **c)
                .await
                .map(|r| r.rows_affected())
        });
        self.observe(result.map_err(DbError::from))
    }

    /// Trivial round trip.
    pub async fn ping(&mut self) -> DbResult<()> {
        let conn = self.connection()?;
        let result = impl_db_dispatch!(LeasedConnection: conn, |c| {
            sqlx::query_scalar::<_, i32>("SELECT 1")
                .fetch_one(&mut **c)
                .await
                .map(|_| ())
        });
        self.observe(result.map_err(DbError::from))
    }

    /// Record a failure seen by code that used [`Lease::connection`] directly.
    pub fn observe<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if let Err(e) = &result {
            if e.is_retryable() {
                debug!(error = %e, "Lease marked broken");
                self.broken = true;
            }
        }
        result
    }

    /// Return the connection to the pool (or close it if broken or stale).
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let stale = self.is_stale();
        if let Some(conn) = self.conn.as_mut() {
            if self.broken || stale {
                conn.close_on_drop();
            }
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("db_type", &self.db_type())
            .field("generation", &self.generation)
            .field("broken", &self.broken)
            .field("held_for", &self.held_for())
            .finish()
    }
}
