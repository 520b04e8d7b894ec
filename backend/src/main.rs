//! Reconciler worker: applies queued pin instructions to upload records.

use std::sync::Arc;

use color_eyre::eyre::{Context, eyre};
use diesel::{Connection, PgConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use pinledger::PinLedgerSettings;
use pinledger::domain::UploadReconciler;
use pinledger::outbound::persistence::{DbPool, DieselUploadRepository, PoolConfig};
use pinledger::outbound::queue::DieselPinQueue;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = PinLedgerSettings::load().map_err(|err| eyre!("load settings: {err}"))?;
    let database_url = settings
        .database_url()
        .ok_or_else(|| eyre!("PINLEDGER_DATABASE_URL must be set"))?
        .to_owned();

    run_migrations(database_url.clone()).await?;

    let pool = DbPool::new(PoolConfig::new(database_url).with_max_size(settings.pool_max_size()))
        .await
        .wrap_err("build connection pool")?;
    let reconciler = Arc::new(UploadReconciler::new(
        Arc::new(DieselUploadRepository::new(pool.clone())),
        Arc::new(DefaultClock),
        settings.retention_policy(),
    ));
    let queue = Arc::new(DieselPinQueue::new(pool));
    let config = settings.reconciler_config();

    info!(
        max_in_flight = config.max_in_flight,
        max_deliveries = config.max_deliveries,
        "reconciler starting"
    );
    let summary = reconciler
        .run(queue, config, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await;
    info!(
        applied = summary.applied,
        dropped = summary.dropped,
        redelivering = summary.redelivering,
        dead_lettered = summary.dead_lettered,
        aborted = summary.aborted,
        "reconciler stopped"
    );
    Ok(())
}

async fn run_migrations(database_url: String) -> color_eyre::Result<()> {
    tokio::task::spawn_blocking(move || -> color_eyre::Result<()> {
        let mut conn = PgConnection::establish(&database_url).wrap_err("connect for migrations")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| eyre!("run migrations: {err}"))?;
        Ok(())
    })
    .await
    .wrap_err("migration task panicked")?
}
