//! Data models for the database layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod health;
pub mod migration;

// Re-export commonly used types
pub use connection::{DatabaseType, PoolStats};
pub use health::{ConnectionUsage, HealthStatus, SlowQuery, TableRowCount};
pub use migration::{MigrationFile, MigrationRecord, MigrationStatus};
