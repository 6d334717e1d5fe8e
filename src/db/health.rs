//! Health monitoring.
//!
//! [`HealthMonitor`] is a background task that probes the pool on a fixed
//! interval. It holds only a `Weak` reference to the [`PoolManager`] and exits
//! when the manager is dropped or its done-channel fires. [`health_report`]
//! gathers the on-demand report printed by `cv-dbkit monitor`.

use crate::db::pool::PoolManager;
use crate::db::schema::{SLOW_QUERY_THRESHOLD_MS, SchemaInspector};
use crate::models::HealthStatus;
use chrono::Utc;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Fraction of the interval that must pass between two probes.
const MIN_TICK_SPACING: f64 = 0.8;

/// Handle to a running probe task.
pub struct HealthMonitor {
    done: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start probing `manager` every `interval`. The first probe runs one
    /// interval after start.
    pub fn spawn(manager: Weak<PoolManager>, interval: Duration) -> Self {
        let (done, done_rx) = watch::channel(false);
        let handle = tokio::spawn(run(manager, interval, done_rx));
        debug!(interval_secs = interval.as_secs(), "Health monitor started");
        Self { done, handle }
    }

    /// Ask the task to stop after its current tick.
    pub fn signal(&self) {
        // Err means the task already exited
        let _ = self.done.send(true);
    }

    /// Stop the task, cancelling an in-flight tick.
    pub fn stop(self) {
        self.signal();
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("finished", &self.is_finished())
            .finish()
    }
}

async fn run(manager: Weak<PoolManager>, interval: Duration, mut done: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick: Option<Instant> = None;

    loop {
        tokio::select! {
            // Fires on stop and when the handle is dropped
            _ = done.changed() => {
                debug!("Health monitor stopped");
                return;
            }
            tick = ticker.tick() => {
                if should_skip(last_tick, tick, interval) {
                    debug!("Health tick too close to the previous one, skipping");
                    continue;
                }
                last_tick = Some(tick);

                let Some(manager) = manager.upgrade() else {
                    info!("Pool manager dropped, health monitor exiting");
                    return;
                };
                if let Err(e) = manager.health_tick().await {
                    debug!(error = %e, "Health tick failed");
                }
                // Drop strong reference before sleeping to allow manager deallocation
                drop(manager);

                if *done.borrow() {
                    return;
                }
            }
        }
    }
}

/// A tick started less than 80% of the interval after the previous one is skipped.
pub fn should_skip(last_tick: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last_tick.is_some_and(|prev| {
        now.saturating_duration_since(prev) < interval.mul_f64(MIN_TICK_SPACING)
    })
}

/// Collect a full health report. Individual metrics that cannot be read are
/// left empty; only an unreachable database fails the report.
pub async fn health_report(manager: &Arc<PoolManager>) -> HealthStatus {
    let db_type = manager.db_type();
    let pool = match manager.pool().await {
        Ok(pool) => pool,
        Err(e) => return HealthStatus::unreachable(db_type, manager.stats().await, e.to_string()),
    };
    if let Err(e) = pool.ping().await {
        return HealthStatus::unreachable(db_type, manager.stats().await, e.to_string());
    }

    let database_size_bytes = SchemaInspector::database_size(&pool)
        .await
        .map_err(|e| warn!(error = %e, "Could not read database size"))
        .ok();
    let connection_usage = SchemaInspector::connection_usage(&pool)
        .await
        .map_err(|e| warn!(error = %e, "Could not read connection usage"))
        .ok()
        .flatten();
    let cache_hit_ratio = SchemaInspector::cache_hit_ratio(&pool)
        .await
        .map_err(|e| warn!(error = %e, "Could not read cache hit ratio"))
        .ok()
        .flatten();
    let table_row_counts = SchemaInspector::table_row_counts(&pool)
        .await
        .map_err(|e| warn!(error = %e, "Could not read table row counts"))
        .unwrap_or_default();
    let slow_queries = SchemaInspector::slow_queries(&pool, SLOW_QUERY_THRESHOLD_MS)
        .await
        .map_err(|e| warn!(error = %e, "Could not read slow queries"))
        .unwrap_or_default();

    let mut status = HealthStatus {
        db_type,
        connection_ok: true,
        database_size_bytes,
        connection_usage,
        cache_hit_ratio,
        table_row_counts,
        slow_queries,
        issues: Vec::new(),
        pool: manager.stats().await,
        checked_at: Utc::now(),
    };
    status.collect_issues();
    status
}
