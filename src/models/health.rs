//! Health report models.
//!
//! A [`HealthStatus`] is computed on demand by the monitor report and never persisted.

use super::connection::{DatabaseType, PoolStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Connection usage at or above this percentage is reported as an issue.
pub const CONNECTION_USAGE_WARN_PERCENT: f64 = 80.0;

/// Cache hit ratios below this value are reported as an issue.
pub const CACHE_HIT_RATIO_WARN: f64 = 0.90;

/// Live row count of a single table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRowCount {
    pub table: String,
    pub rows: u64,
}

/// A statement whose mean execution time exceeded the slow-query threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowQuery {
    pub query: String,
    pub calls: u64,
    pub mean_ms: f64,
}

/// Server-side connection usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConnectionUsage {
    pub active: u32,
    pub max: u32,
    pub percent: f64,
}

impl ConnectionUsage {
    pub fn new(active: u32, max: u32) -> Self {
        let percent = if max == 0 {
            0.0
        } else {
            f64::from(active) * 100.0 / f64::from(max)
        };
        Self {
            active,
            max,
            percent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub db_type: DatabaseType,
    pub connection_ok: bool,
    pub database_size_bytes: Option<u64>,
    pub connection_usage: Option<ConnectionUsage>,
    pub cache_hit_ratio: Option<f64>,
    pub table_row_counts: Vec<TableRowCount>,
    pub slow_queries: Vec<SlowQuery>,
    pub issues: Vec<String>,
    pub pool: PoolStats,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// A status for a database that could not be reached at all.
    pub fn unreachable(db_type: DatabaseType, pool: PoolStats, reason: impl Into<String>) -> Self {
        Self {
            db_type,
            connection_ok: false,
            database_size_bytes: None,
            connection_usage: None,
            cache_hit_ratio: None,
            table_row_counts: Vec::new(),
            slow_queries: Vec::new(),
            issues: vec![format!("Database unreachable: {}", reason.into())],
            pool,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.connection_ok && self.issues.is_empty()
    }

    /// Derive the issue list from the collected metrics.
    pub fn collect_issues(&mut self) {
        if let Some(usage) = self.connection_usage {
            if usage.percent >= CONNECTION_USAGE_WARN_PERCENT {
                self.issues.push(format!(
                    "High connection usage: {}/{} ({:.1}%)",
                    usage.active, usage.max, usage.percent
                ));
            }
        }
        if self.pool.usage_percent() >= CONNECTION_USAGE_WARN_PERCENT {
            self.issues.push(format!(
                "Pool nearly exhausted: {}/{} leased",
                self.pool.leased, self.pool.max_connections
            ));
        }
        if let Some(ratio) = self.cache_hit_ratio {
            if ratio < CACHE_HIT_RATIO_WARN {
                self.issues
                    .push(format!("Low cache hit ratio: {:.2}%", ratio * 100.0));
            }
        }
        if !self.slow_queries.is_empty() {
            self.issues
                .push(format!("{} slow queries detected", self.slow_queries.len()));
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database health report ({})", self.db_type)?;
        writeln!(f, "  Checked at:        {}", self.checked_at.to_rfc3339())?;
        writeln!(
            f,
            "  Connection:        {}",
            if self.connection_ok { "OK" } else { "FAILED" }
        )?;
        match self.database_size_bytes {
            Some(bytes) => writeln!(
                f,
                "  Database size:     {}",
                humansize::format_size(bytes, humansize::DECIMAL)
            )?,
            None => writeln!(f, "  Database size:     n/a")?,
        }
        if let Some(usage) = self.connection_usage {
            writeln!(
                f,
                "  Connections:       {}/{} ({:.1}%)",
                usage.active, usage.max, usage.percent
            )?;
        }
        writeln!(
            f,
            "  Pool:              {} leased, {} idle, max {} (generation {})",
            self.pool.leased, self.pool.idle, self.pool.max_connections, self.pool.generation
        )?;
        match self.cache_hit_ratio {
            Some(ratio) => writeln!(f, "  Cache hit ratio:   {:.2}%", ratio * 100.0)?,
            None => writeln!(f, "  Cache hit ratio:   n/a")?,
        }

        if !self.table_row_counts.is_empty() {
            writeln!(f, "  Tables:")?;
            for table in &self.table_row_counts {
                writeln!(f, "    {:<28} {:>12} rows", table.table, table.rows)?;
            }
        }

        if !self.slow_queries.is_empty() {
            writeln!(f, "  Slow queries:")?;
            for query in &self.slow_queries {
                writeln!(
                    f,
                    "    {:>9.1}ms x{:<6} {}",
                    query.mean_ms, query.calls, query.query
                )?;
            }
        }

        if self.issues.is_empty() {
            write!(f, "  Issues:            none")
        } else {
            writeln!(f, "  Issues:")?;
            let last = self.issues.len() - 1;
            for (i, issue) in self.issues.iter().enumerate() {
                if i == last {
                    write!(f, "    - {}", issue)?;
                } else {
                    writeln!(f, "    - {}", issue)?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> HealthStatus {
        HealthStatus {
            db_type: DatabaseType::PostgreSQL,
            connection_ok: true,
            database_size_bytes: Some(12_000_000),
            connection_usage: Some(ConnectionUsage::new(10, 100)),
            cache_hit_ratio: Some(0.99),
            table_row_counts: vec![TableRowCount {
                table: "plans".to_string(),
                rows: 4,
            }],
            slow_queries: Vec::new(),
            issues: Vec::new(),
            pool: PoolStats {
                size: 2,
                idle: 2,
                leased: 0,
                max_connections: 10,
                generation: 1,
            },
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_healthy_status_has_no_issues() {
        let mut s = status();
        s.collect_issues();
        assert!(s.is_healthy());
    }

    #[test]
    fn test_collect_issues_flags_thresholds() {
        let mut s = status();
        s.connection_usage = Some(ConnectionUsage::new(85, 100));
        s.cache_hit_ratio = Some(0.5);
        s.slow_queries.push(SlowQuery {
            query: "SELECT * FROM resumes".to_string(),
            calls: 12,
            mean_ms: 1500.0,
        });
        s.collect_issues();
        assert_eq!(s.issues.len(), 3);
        assert!(!s.is_healthy());
    }

    #[test]
    fn test_display_contains_summary() {
        let rendered = status().to_string();
        assert!(rendered.contains("Connection:        OK"));
        assert!(rendered.contains("MB"));
        assert!(rendered.contains("plans"));
        assert!(rendered.contains("99.00%"));
    }

    #[test]
    fn test_unreachable() {
        let s = HealthStatus::unreachable(DatabaseType::SQLite, PoolStats::default(), "refused");
        assert!(!s.connection_ok);
        assert_eq!(s.issues.len(), 1);
    }
}
