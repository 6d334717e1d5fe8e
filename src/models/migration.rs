//! Migration bookkeeping models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A row of the `schema_migrations` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    /// File name of the applied migration, e.g. `20250101000000_create_plans.sql`.
    pub version: String,
    pub applied_at: DateTime<Utc>,
}

/// A migration file discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: String,
    pub path: PathBuf,
    /// Leading digits of the file name.
    pub timestamp: String,
}

/// Applied and pending migrations, as reported by `migrate status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<String>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}
