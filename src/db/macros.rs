//! Backend dispatch macro.
//!
//! Pools, leased connections and transactions are all two-variant enums over
//! the PostgreSQL and SQLite sqlx types. Most operations on them are textually
//! identical per backend and differ only in the concrete type, so the match is
//! generated instead of written out each time.

/// Dispatch on a `Postgres` / `SQLite` enum.
///
/// The enum type must be in scope at the call site.
///
/// Two forms are supported: one body shared by both variants, or explicit
/// arms when the backends need different SQL.
///
/// # Example
///
/// ```ignore
/// // Shared body
/// impl_db_dispatch!(DbPool: self, |p| p.close().await);
///
/// // Per-backend arms
/// impl_db_dispatch!(DbPool: pool, {
///     Postgres(p) => sqlx::query(queries::postgres::SELECT).fetch_all(p).await,
///     SQLite(p) => sqlx::query(queries::sqlite::SELECT).fetch_all(p).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident: $value:expr, |$inner:ident| $body:expr) => {
        match $value {
            $enum::Postgres($inner) => $body,
            $enum::SQLite($inner) => $body,
        }
    };
    ($enum:ident: $value:expr, { $($variant:ident($inner:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $enum::$variant($inner) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    #[derive(Debug)]
    enum Backend {
        Postgres(u32),
        SQLite(u32),
    }

    #[test]
    fn test_shared_body_dispatch() {
        let pg = Backend::Postgres(2);
        let lite = Backend::SQLite(3);
        assert_eq!(impl_db_dispatch!(Backend: &pg, |n| *n * 10), 20);
        assert_eq!(impl_db_dispatch!(Backend: &lite, |n| *n * 10), 30);
    }

    #[test]
    fn test_per_variant_dispatch() {
        let value = Backend::SQLite(7);
        let label = impl_db_dispatch!(Backend: value, {
            Postgres(_n) => "postgres",
            SQLite(_n) => "sqlite",
        });
        assert_eq!(label, "sqlite");
    }
}
