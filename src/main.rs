//! xui-manager daemon entry point.
//!
//! Connects to the vendor database, starts the maintenance loop and waits
//! for shutdown. Administrative traffic reaches the library through
//! whatever surface the deployment puts in front of it.

use tracing_subscriber::EnvFilter;

use xui_manager::Manager;
use xui_manager::config::ManagerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ManagerConfig::from_env()?;
    tracing::info!(database = %config.database_path.display(), "starting xui-manager");

    // Connect the stack
    let manager = Manager::connect(config).await?;
    let maintenance = manager.start_maintenance();

    tracing::info!("xui-manager running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    if let Some(handle) = maintenance {
        handle.abort();
    }
    tracing::info!("xui-manager stopped");
    Ok(())
}
