//! Process entry point for the configuration service's read tier.

mod project_resolver;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use confplane_db::{create_mysql_pool, create_sqlite_pool, run_migrations, DatabasePool};
use confplane_platform::{shutdown_signal, ControlPlane, PortClass, PortPolicy};
use confplane_settings::{ConfigLoader, ConfigManager};

use project_resolver::StaticProjectResolver;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let environment = std::env::var("CONFPLANE__ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    confplane_telemetry::init_telemetry("confplane=info,tower_http=info")?;
    info!(environment, "starting configuration service");

    let config_loader = ConfigLoader::new("config", &environment);
    let config_manager = ConfigManager::new(config_loader)?;
    let config = config_manager.get_config();

    let pool = if let Some(sqlite_url) = config.database.sqlite_url.as_ref().filter(|_| environment == "test") {
        DatabasePool::Sqlite(create_sqlite_pool(sqlite_url).await?)
    } else {
        DatabasePool::MySql(create_mysql_pool(&config.database).await?)
    };
    info!("database connection established");

    if let Err(e) = run_migrations(&pool).await {
        warn!(error = %e, "migration run reported an error, continuing if already applied");
    }

    let project_resolver: Arc<dyn confplane_api::ProjectResolver> =
        Arc::new(StaticProjectResolver::from_env());

    let port_policy = PortPolicy::new(config.server.port, PortClass::Public, "confplane-api")
        .with_fallback_range((config.server.port + 1)..=(config.server.port + 9));

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

    let control_plane = ControlPlane::start(
        pool,
        config.replication,
        project_resolver,
        config.server.host.clone(),
        port_policy,
        fatal_tx,
    )
    .await?;

    info!(port = control_plane.bound_port(), "read API serving");

    tokio::select! {
        Some(fatal) = fatal_rx.recv() => {
            error!(error = %fatal, "fatal error reported, shutting down");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining");
        }
    }

    control_plane.stop().await;
    info!("shutdown complete");
    Ok(())
}
