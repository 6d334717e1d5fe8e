//! Catalog introspection.
//!
//! Bootstrap needs to know whether the baseline schema exists, and the health
//! report needs sizes, row counts and server statistics.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, sqlite), each providing the same interface.

use crate::db::pool::DbPool;
use crate::error::DbResult;
use crate::impl_db_dispatch;
use crate::models::{ConnectionUsage, SlowQuery, TableRowCount};

/// Statements slower than this on average are reported.
pub const SLOW_QUERY_THRESHOLD_MS: f64 = 1000.0;

/// Schema inspector for database introspection.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Check whether a table exists in the current schema.
    pub async fn table_exists(pool: &DbPool, table: &str) -> DbResult<bool> {
        impl_db_dispatch!(DbPool: pool, {
            Postgres(p) => postgres::table_exists(p, table).await,
            SQLite(p) => sqlite::table_exists(p, table).await,
        })
    }

    /// List user tables, sorted by name.
    pub async fn list_tables(pool: &DbPool) -> DbResult<Vec<String>> {
        impl_db_dispatch!(DbPool: pool, {
            Postgres(p) => postgres::list_tables(p).await,
            SQLite(p) => sqlite::list_tables(p).await,
        })
    }

    /// Total on-disk size of the database in bytes.
    pub async fn database_size(pool: &DbPool) -> DbResult<u64> {
        impl_db_dispatch!(DbPool: pool, {
            Postgres(p) => postgres::database_size(p).await,
            SQLite(p) => sqlite::database_size(p).await,
        })
    }

    /// Row counts per user table.
    pub async fn table_row_counts(pool: &DbPool) -> DbResult<Vec<TableRowCount>> {
        impl_db_dispatch!(DbPool: pool, {
            Postgres(p) => postgres::table_row_counts(p).await,
            SQLite(p) => sqlite::table_row_counts(p).await,
        })
    }

    /// Server-side connection usage. SQLite has no server and returns `None`.
    pub async fn connection_usage(pool: &DbPool) -> DbResult<Option<ConnectionUsage>> {
        match pool {
            DbPool::Postgres(p) => postgres::connection_usage(p).await.map(Some),
            DbPool::SQLite(_) => Ok(None),
        }
    }

    /// Heap cache hit ratio in `0.0..=1.0`, when the backend tracks it.
    pub async fn cache_hit_ratio(pool: &DbPool) -> DbResult<Option<f64>> {
        match pool {
            DbPool::Postgres(p) => postgres::cache_hit_ratio(p).await,
            DbPool::SQLite(_) => Ok(None),
        }
    }

    /// Slow statements, when `pg_stat_statements` is installed.
    pub async fn slow_queries(pool: &DbPool, threshold_ms: f64) -> DbResult<Vec<SlowQuery>> {
        match pool {
            DbPool::Postgres(p) => postgres::slow_queries(p, threshold_ms).await,
            DbPool::SQLite(_) => Ok(Vec::new()),
        }
    }
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const TABLE_EXISTS: &str = r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
        "#;

        pub const LIST_TABLES: &str = r#"
            SELECT table_name::TEXT AS table_name
            FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;

        pub const DATABASE_SIZE: &str =
            "SELECT pg_database_size(current_database())::BIGINT AS size_bytes";

        pub const TABLE_ROW_COUNTS: &str = r#"
            SELECT relname::TEXT AS table_name, n_live_tup::BIGINT AS row_count
            FROM pg_stat_user_tables
            ORDER BY n_live_tup DESC, relname
        "#;

        pub const CONNECTION_USAGE: &str = r#"
            SELECT
                (SELECT COUNT(*) FROM pg_stat_activity WHERE datname = current_database())::BIGINT AS active,
                current_setting('max_connections')::BIGINT AS max_connections
        "#;

        pub const CACHE_HIT_RATIO: &str = r#"
            SELECT (SUM(heap_blks_hit)::FLOAT8
                    / NULLIF(SUM(heap_blks_hit) + SUM(heap_blks_read), 0)::FLOAT8) AS ratio
            FROM pg_statio_user_tables
        "#;

        pub const HAS_PG_STAT_STATEMENTS: &str =
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'pg_stat_statements')";

        pub const SLOW_QUERIES: &str = r#"
            SELECT query, calls::BIGINT AS calls, mean_exec_time::FLOAT8 AS mean_ms
            FROM pg_stat_statements
            WHERE mean_exec_time > $1
            ORDER BY mean_exec_time DESC
            LIMIT 10
        "#;
    }

    pub mod sqlite {
        pub const TABLE_EXISTS: &str =
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?";

        pub const LIST_TABLES: &str = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
        "#;

        pub const DATABASE_SIZE: &str =
            "SELECT page_count * page_size AS size_bytes FROM pragma_page_count(), pragma_page_size()";
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};
    use tracing::debug;

    pub async fn table_exists(pool: &PgPool, table: &str) -> DbResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(queries::postgres::TABLE_EXISTS)
            .bind(table)
            .fetch_one(pool)
            .await?;
        Ok(exists)
    }

    pub async fn list_tables(pool: &PgPool) -> DbResult<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(queries::postgres::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        debug!(count = tables.len(), "Listed PostgreSQL tables");
        Ok(tables)
    }

    pub async fn database_size(pool: &PgPool) -> DbResult<u64> {
        let size = sqlx::query_scalar::<_, i64>(queries::postgres::DATABASE_SIZE)
            .fetch_one(pool)
            .await?;
        Ok(size.max(0) as u64)
    }

    pub async fn table_row_counts(pool: &PgPool) -> DbResult<Vec<TableRowCount>> {
        let rows = sqlx::query(queries::postgres::TABLE_ROW_COUNTS)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| TableRowCount {
                table: row.get("table_name"),
                rows: row.get::<i64, _>("row_count").max(0) as u64,
            })
            .collect())
    }

    pub async fn connection_usage(pool: &PgPool) -> DbResult<ConnectionUsage> {
        let row = sqlx::query(queries::postgres::CONNECTION_USAGE)
            .fetch_one(pool)
            .await?;
        let active: i64 = row.get("active");
        let max: i64 = row.get("max_connections");
        Ok(ConnectionUsage::new(
            u32::try_from(active).unwrap_or(u32::MAX),
            u32::try_from(max).unwrap_or(u32::MAX),
        ))
    }

    pub async fn cache_hit_ratio(pool: &PgPool) -> DbResult<Option<f64>> {
        let ratio = sqlx::query_scalar::<_, Option<f64>>(queries::postgres::CACHE_HIT_RATIO)
            .fetch_one(pool)
            .await?;
        Ok(ratio)
    }

    pub async fn slow_queries(pool: &PgPool, threshold_ms: f64) -> DbResult<Vec<SlowQuery>> {
        let installed = sqlx::query_scalar::<_, bool>(queries::postgres::HAS_PG_STAT_STATEMENTS)
            .fetch_one(pool)
            .await?;
        if !installed {
            debug!("pg_stat_statements not installed, skipping slow query report");
            return Ok(Vec::new());
        }

        let rows = sqlx::query(queries::postgres::SLOW_QUERIES)
            .bind(threshold_ms)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| SlowQuery {
                query: row.get("query"),
                calls: row.get::<i64, _>("calls").max(0) as u64,
                mean_ms: row.get("mean_ms"),
            })
            .collect())
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqlitePool;
    use tracing::debug;

    pub async fn table_exists(pool: &SqlitePool, table: &str) -> DbResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(queries::sqlite::TABLE_EXISTS)
            .bind(table)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn list_tables(pool: &SqlitePool) -> DbResult<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(queries::sqlite::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        debug!(count = tables.len(), "Listed SQLite tables");
        Ok(tables)
    }

    pub async fn database_size(pool: &SqlitePool) -> DbResult<u64> {
        let size = sqlx::query_scalar::<_, i64>(queries::sqlite::DATABASE_SIZE)
            .fetch_one(pool)
            .await?;
        Ok(size.max(0) as u64)
    }

    pub async fn table_row_counts(pool: &SqlitePool) -> DbResult<Vec<TableRowCount>> {
        let tables = list_tables(pool).await?;
        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(&table));
            let rows = sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await?;
            counts.push(TableRowCount {
                table,
                rows: rows.max(0) as u64,
            });
        }
        counts.sort_by(|a, b| b.rows.cmp(&a.rows).then_with(|| a.table.cmp(&b.table)));
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("plans"), "\"plans\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
