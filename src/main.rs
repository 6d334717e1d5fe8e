//! cv-dbkit: operational entry point.
//!
//! `serve` bootstraps the database and holds the pool until SIGINT/SIGTERM;
//! `init`, `migrate` and `monitor` are one-shot commands. Exit code 0 on
//! success, 1 on failure.

use cv_dbkit::bootstrap::{AdminSeed, CommandSchema, InitOptions, InitOutcome, Initializer};
use cv_dbkit::config::{Command, Config, InitArgs, MigrateAction};
use cv_dbkit::db::{PoolManager, health_report};
use cv_dbkit::migrate::{self, MigrateOptions, Migrator};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

type BoxError = Box<dyn std::error::Error>;

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::parse_args();
    init_tracing(&config);
    let config = &config;

    info!(
        environment = %config.environment,
        "Starting cv-dbkit v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = match &config.command {
        Command::Serve(args) => {
            with_database(config, |manager, migrator| async move {
                bootstrap(config, &manager, migrator, args).await?;
                info!("Database ready, waiting for shutdown signal");
                wait_for_signal().await;
                info!("Shutting down, draining pool");
                Ok::<(), BoxError>(())
            })
            .await
        }
        Command::Init(args) => {
            with_database(config, |manager, migrator| async move {
                bootstrap(config, &manager, migrator, args).await
            })
            .await
        }
        Command::Migrate {
            action: MigrateAction::Run { dry_run, force },
        } => {
            let options = MigrateOptions {
                dry_run: *dry_run,
                force: *force,
                ..MigrateOptions::default()
            };
            with_database(config, |_, migrator| async move {
                let versions = migrator.apply(&options).await?;
                let verb = if options.dry_run { "Pending" } else { "Applied" };
                println!("{} {} migration(s)", verb, versions.len());
                for version in versions {
                    println!("  {}", version);
                }
                Ok::<(), BoxError>(())
            })
            .await
        }
        Command::Migrate {
            action: MigrateAction::Status,
        } => {
            with_database(config, |_, migrator| async move {
                let status = migrator.status().await?;
                println!("Applied ({}):", status.applied.len());
                for record in &status.applied {
                    println!("  {}  {}", record.version, record.applied_at.to_rfc3339());
                }
                println!("Pending ({}):", status.pending.len());
                for version in &status.pending {
                    println!("  {}", version);
                }
                Ok::<(), BoxError>(())
            })
            .await
        }
        // Creating a migration file needs no database.
        Command::Migrate {
            action: MigrateAction::Create { name },
        } => match migrate::create_migration(&config.migrations_dir, name).await {
            Ok(path) => {
                println!("Created {}", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Command::Monitor { json } => {
            with_database(config, |manager, _| async move {
                let report = health_report(&manager).await;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print!("{}", report);
                }
                if !report.is_healthy() {
                    warn!(issues = report.issues.len(), "Database reported issues");
                }
                Ok::<(), BoxError>(())
            })
            .await
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

/// Build the pool manager, run `command` against it and drain the pool afterwards.
async fn with_database<F, Fut>(config: &Config, command: F) -> Result<(), BoxError>
where
    F: FnOnce(Arc<PoolManager>, Migrator) -> Fut,
    Fut: Future<Output = Result<(), BoxError>>,
{
    let db_config = config.database_config()?;
    let settings = config.pool_settings(&db_config);
    info!(
        database = %db_config.masked_connection_string(),
        db_type = %db_config.db_type,
        max_connections = settings.max_connections,
        "Using database"
    );
    let manager = PoolManager::new(db_config, settings);
    let migrator = Migrator::new(manager.clone(), &config.migrations_dir)
        .with_require_force(config.migration_require_force);

    let result = command(manager.clone(), migrator).await;
    manager.close().await;
    result
}

async fn bootstrap(
    config: &Config,
    manager: &Arc<PoolManager>,
    migrator: Migrator,
    args: &InitArgs,
) -> Result<(), BoxError> {
    let mut initializer = Initializer::new(manager.clone(), migrator).with_admin(AdminSeed {
        email: config.admin_email.clone(),
        password: config.admin_password.clone(),
    });
    if let Some(command) = &config.schema_command {
        initializer = initializer.with_provisioner(CommandSchema::new(
            command,
            manager.database_config().connection_string.clone(),
        ));
    }

    match initializer.initialize(&InitOptions::from(args)).await {
        InitOutcome::Ready(report) => {
            if !report.tuning_warnings.is_empty() {
                warn!(count = report.tuning_warnings.len(), "Runtime tuning incomplete");
            }
            Ok(())
        }
        InitOutcome::Failed { attempts, error } => {
            error!(attempts, "Bootstrap gave up");
            Err(error.into())
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
