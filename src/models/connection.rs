//! Connection-related data models.
//!
//! This module defines the supported backends and the pool statistics snapshot.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Whether connections to this backend travel over the network.
    pub fn is_networked(&self) -> bool {
        matches!(self, Self::PostgreSQL)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Point-in-time view of the pool's occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections, idle plus leased.
    pub size: u32,
    pub idle: u32,
    pub leased: u32,
    pub max_connections: u32,
    /// Incremented every time the pool is replaced or closed.
    pub generation: u64,
}

impl PoolStats {
    /// Leased connections as a percentage of the pool ceiling.
    pub fn usage_percent(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        f64::from(self.leased) * 100.0 / f64::from(self.max_connections)
    }
}
