//! CV platform database toolkit.
//!
//! Connection pooling with health monitoring and automatic reset, ordered
//! transactional schema migrations, and an idempotent first-start bootstrap
//! for PostgreSQL and SQLite.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod models;

pub use bootstrap::{InitOptions, InitOutcome, Initializer};
pub use config::Config;
pub use db::PoolManager;
pub use error::{DbError, DbResult};
pub use migrate::Migrator;
