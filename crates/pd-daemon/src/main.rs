//! pingdom daemon: collects daily traffic analytics and serves reports over HTTP.

use anyhow::{Context, Result};
use pd_core::config::Config;
use pd_daemon::daemon::Daemon;
use pd_telemetry::logging::{init_logging, LogFormat};
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    dotenv::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;
    init_logging(
        &config.general.service_name,
        &config.general.log_level,
        LogFormat::parse(&config.general.log_format),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "pingdom daemon starting");

    let daemon = Daemon::new(config).await?;

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c, shutting down");
                shutdown.trigger();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    daemon.run().await
}
