//! Sandwich daemon entry point
//!
//! Run with:
//! ```bash
//! cargo run -p sandwich-api
//! ```
//!
//! Process settings come from environment variables (and `.env`); identities
//! come from the JSON file at `SANDWICH_CONFIG_PATH`.

use sandwich_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Sandwich failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        address = %config.api.address(),
        node_id = config.cluster.node_id,
        node_count = config.cluster.node_count,
        "Configuration loaded"
    );

    sandwich_api::run(config).await?;

    info!("Sandwich stopped");
    Ok(())
}
