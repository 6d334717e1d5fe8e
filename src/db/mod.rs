//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management with generation-checked leases
//! - Retry with exponential backoff for transient failures
//! - Background health probing and on-demand health reports
//! - Catalog introspection
//! - Database dispatch macros for reducing code duplication

pub mod health;
pub mod lease;
pub mod macros;
pub mod pool;
pub mod retry;
pub mod schema;
pub mod transaction;

pub use health::{HealthMonitor, health_report};
pub use lease::{Lease, LeasedConnection};
pub use pool::{DbPool, PoolManager};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use schema::SchemaInspector;
pub use transaction::DbTransaction;
