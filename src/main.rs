use std::sync::Arc;

use mlm_hierarchy::config::config;
use mlm_hierarchy::database::{DatabaseManager, HierarchyStore, PgStore};
use mlm_hierarchy::hierarchy::{Clock, SystemClock};
use mlm_hierarchy::scheduler::{ScanRunner, Scheduler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL and friends
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config();
    tracing::info!("Starting hierarchy scheduler in {:?} mode", config.environment);

    let pool = DatabaseManager::connect(&config.database).await?;
    DatabaseManager::migrate(&pool).await?;

    let store: Arc<dyn HierarchyStore> = Arc::new(PgStore::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runner = ScanRunner::from_config(store, clock.clone(), &config.rules, &config.scheduler);

    let handle = Scheduler::new(runner, config.scheduler.clone(), clock).start();
    tracing::info!(
        am_promotion = %config.scheduler.am_promotion,
        dm_promotion = %config.scheduler.dm_promotion,
        demotion = %config.scheduler.demotion,
        "Scheduler running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, waiting for running scans");

    handle.stop().await;
    DatabaseManager::close(pool).await;
    Ok(())
}
