//! Error types for the database layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants carry enough context for operators to act on them: connection failures
//! include a suggestion, database failures keep their SQLSTATE, and migration
//! failures name the migration that broke.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "08006" for connection failure
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Connection pool exhausted: all {max_connections} connections leased after waiting {waited_ms}ms")]
    PoolExhausted { max_connections: u32, waited_ms: u64 },

    #[error("Timed out establishing a database connection after {waited_ms}ms")]
    ConnectionTimeout { waited_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error(
        "Connection lease is stale: leased from pool generation {lease_generation}, current generation is {current_generation}"
    )]
    StaleLease {
        lease_generation: u64,
        current_generation: u64,
    },

    #[error("Timeout: {operation} exceeded {limit_ms}ms")]
    Timeout {
        operation: String,
        limit_ms: u64,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Migration '{version}' failed: {message}")]
    Migration { version: String, message: String },

    #[error(
        "Running migrations in production requires --force (or MIGRATION_REQUIRE_FORCE=false)"
    )]
    ProductionMigrationBlocked,

    #[error("Seeding '{category}' failed: {message}")]
    Seed { category: String, message: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit_ms: limit.as_millis() as u64,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a migration error.
    pub fn migration(version: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            version: version.into(),
            message: message.into(),
        }
    }

    /// Create a seed error.
    pub fn seed(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Seed {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create an I/O error with the path or action that failed.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Release leases promptly or raise max_connections for this profile")
            }
            Self::StaleLease { .. } => Some("Acquire a new connection after a pool reset"),
            Self::ProductionMigrationBlocked => Some("Re-run with --force after review"),
            _ => None,
        }
    }

    /// SQLSTATE code of a database error, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is transient and worth retrying.
    ///
    /// Only transport-class failures qualify. Pool exhaustion and acquisition
    /// timeouts are backpressure and are surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Database { sql_state, .. } => sql_state
                .as_deref()
                .is_some_and(is_connection_failure_code),
            _ => false,
        }
    }

    /// Check if this error indicates the pool itself is unhealthy.
    ///
    /// Consecutive fatal errors are counted toward an automatic pool reset.
    pub fn is_fatal(&self) -> bool {
        self.is_retryable() || matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Check if this error is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            // 23505 (PostgreSQL), 2067/1555 (SQLite extended codes)
            Self::Database { sql_state, .. } => {
                matches!(sql_state.as_deref(), Some("23505") | Some("2067") | Some("1555"))
            }
            _ => false,
        }
    }
}

/// SQLSTATE class 08 covers connection exceptions (08000, 08003, 08006, ...).
fn is_connection_failure_code(code: &str) -> bool {
    code.starts_with("08")
}

fn is_transport_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
    )
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // The pool refines this into PoolExhausted / ConnectionTimeout with real numbers.
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted {
                max_connections: 0,
                waited_ms: 0,
            },
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) if is_transport_io(&io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Io(io_err) => DbError::io("database driver", io_err),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "The connection will be discarded; retry the operation",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
