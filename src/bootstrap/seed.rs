//! Seed data.
//!
//! The registry is fixed at compile time: [`SeedCategory::ALL`] lists what the
//! initializer seeds, in order. Every seed is idempotent and safe to run
//! against a database that already has its rows.

use crate::bootstrap::password::hash_password;
use crate::db::DbPool;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedCategory {
    Plans,
    Admin,
}

impl SeedCategory {
    /// Seeding order; the admin account references the enterprise plan.
    pub const ALL: [SeedCategory; 2] = [SeedCategory::Plans, SeedCategory::Admin];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plans => "plans",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for SeedCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One subscription tier.
#[derive(Debug, Clone, Copy)]
pub struct PlanSeed {
    pub name: &'static str,
    pub price_cents: i32,
    /// Monthly CV scans; `None` is unlimited.
    pub scan_limit: Option<i32>,
    pub features: &'static [&'static str],
}

pub const PLANS: [PlanSeed; 4] = [
    PlanSeed {
        name: "free",
        price_cents: 0,
        scan_limit: Some(3),
        features: &["3 CV scans per month", "Basic ATS score"],
    },
    PlanSeed {
        name: "basic",
        price_cents: 999,
        scan_limit: Some(20),
        features: &[
            "20 CV scans per month",
            "Detailed ATS analysis",
            "Keyword suggestions",
        ],
    },
    PlanSeed {
        name: "pro",
        price_cents: 2999,
        scan_limit: Some(100),
        features: &[
            "100 CV scans per month",
            "Detailed ATS analysis",
            "Keyword suggestions",
            "Job description matching",
            "Priority support",
        ],
    },
    PlanSeed {
        name: "enterprise",
        price_cents: 9999,
        scan_limit: None,
        features: &[
            "Unlimited CV scans",
            "Everything in Pro",
            "Team management",
            "API access",
            "Dedicated support",
        ],
    },
];

/// Credentials for the seeded admin account.
#[derive(Clone, Default)]
pub struct AdminSeed {
    pub email: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Insert the plan tiers when the `plans` table is empty. Returns rows inserted.
pub async fn seed_plans(pool: &DbPool) -> DbResult<usize> {
    let existing = count(pool, queries::COUNT_PLANS).await?;
    if existing > 0 {
        info!(existing, "Plans already present, skipping");
        return Ok(0);
    }

    let mut inserted = 0;
    for plan in &PLANS {
        let features = serde_json::to_string(plan.features)
            .map_err(|e| DbError::seed(SeedCategory::Plans.name(), e.to_string()))?;
        let result = impl_db_dispatch!(DbPool: pool, {
            Postgres(p) => sqlx::query(queries::postgres::INSERT_PLAN)
                .bind(plan.name)
                .bind(plan.price_cents)
                .bind(plan.scan_limit)
                .bind(&features)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
            SQLite(p) => sqlx::query(queries::sqlite::INSERT_PLAN)
                .bind(plan.name)
                .bind(plan.price_cents)
                .bind(plan.scan_limit)
                .bind(&features)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
        });
        inserted += result
            .map_err(|e| DbError::seed(SeedCategory::Plans.name(), e.to_string()))?
            as usize;
    }

    info!(inserted, "Seeded plans");
    Ok(inserted)
}

/// Create the admin account unless one exists. Returns whether a row was inserted.
pub async fn seed_admin(pool: &DbPool, admin: &AdminSeed) -> DbResult<bool> {
    let existing = count(pool, queries::COUNT_ADMINS).await?;
    if existing > 0 {
        info!("Admin account already present, skipping");
        return Ok(false);
    }

    let Some(password) = admin.password.clone() else {
        warn!(email = %admin.email, "ADMIN_PASSWORD not set, skipping admin account");
        return Ok(false);
    };

    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| DbError::internal(format!("password hashing task failed: {}", e)))??;

    let result = impl_db_dispatch!(DbPool: pool, {
        Postgres(p) => sqlx::query(queries::postgres::INSERT_ADMIN)
            .bind(&admin.email)
            .bind(&hash)
            .execute(p)
            .await
            .map(|r| r.rows_affected()),
        SQLite(p) => sqlx::query(queries::sqlite::INSERT_ADMIN)
            .bind(&admin.email)
            .bind(&hash)
            .execute(p)
            .await
            .map(|r| r.rows_affected()),
    });
    let inserted = result.map_err(|e| DbError::seed(SeedCategory::Admin.name(), e.to_string()))?;

    if inserted > 0 {
        info!(email = %admin.email, "Seeded admin account");
    } else {
        warn!(email = %admin.email, "A user with the admin email already exists, not promoted");
    }
    Ok(inserted > 0)
}

async fn count(pool: &DbPool, sql: &str) -> DbResult<i64> {
    let n = impl_db_dispatch!(DbPool: pool, |p| sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(p)
        .await?);
    Ok(n)
}

mod queries {
    pub const COUNT_PLANS: &str = "SELECT COUNT(*) FROM plans";
    pub const COUNT_ADMINS: &str = "SELECT COUNT(*) FROM users WHERE role = 'admin'";

    pub mod postgres {
        pub const INSERT_PLAN: &str = r#"
            INSERT INTO plans (name, price_cents, scan_limit, features)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
        "#;

        pub const INSERT_ADMIN: &str = r#"
            INSERT INTO users (email, password_hash, role, plan_id)
            VALUES ($1, $2, 'admin', (SELECT id FROM plans WHERE name = 'enterprise'))
            ON CONFLICT (email) DO NOTHING
        "#;
    }

    pub mod sqlite {
        pub const INSERT_PLAN: &str = r#"
            INSERT INTO plans (name, price_cents, scan_limit, features)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (name) DO NOTHING
        "#;

        pub const INSERT_ADMIN: &str = r#"
            INSERT INTO users (email, password_hash, role, plan_id)
            VALUES (?, ?, 'admin', (SELECT id FROM plans WHERE name = 'enterprise'))
            ON CONFLICT (email) DO NOTHING
        "#;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order() {
        assert_eq!(SeedCategory::ALL, [SeedCategory::Plans, SeedCategory::Admin]);
    }

    #[test]
    fn test_plan_tiers() {
        let names: Vec<_> = PLANS.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["free", "basic", "pro", "enterprise"]);
        let limits: Vec<_> = PLANS.iter().map(|p| p.scan_limit).collect();
        assert_eq!(limits, vec![Some(3), Some(20), Some(100), None]);
        assert!(PLANS.iter().all(|p| !p.features.is_empty()));
    }

    #[test]
    fn test_admin_seed_debug_hides_password() {
        let admin = AdminSeed {
            email: "admin@localhost".to_string(),
            password: Some("hunter2".to_string()),
        };
        let rendered = format!("{:?}", admin);
        assert!(!rendered.contains("hunter2"));
    }
}
