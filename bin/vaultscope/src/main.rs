//! Entrypoint.

use std::sync::Arc;

use clap::Parser;
use config::Opts;
use dotenvy::dotenv;
use driver::Driver;
use eyre::WrapErr;
use runtime::{ShutdownSignal, forward_shutdown, health};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        // Try the default .env file, and ignore if it doesn't exist.
        dotenv().ok();
    }

    let opts = Opts::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("🔭 Vaultscope importer starting...");

    let (shutdown, _) = broadcast::channel(1);
    let signal = ShutdownSignal::new().wrap_err("failed to install signal handlers")?;
    tokio::spawn(forward_shutdown(signal, shutdown.clone()));

    let health_addr = opts.health_addr;
    let driver = Driver::new(opts).await?;

    let mut health_shutdown = shutdown.subscribe();
    let progress = Arc::new(driver.progress());
    tokio::spawn(async move {
        let stop = async move {
            let _ = health_shutdown.recv().await;
        };
        if let Err(err) = health::serve(health_addr, progress, stop).await {
            error!(err = %format!("{err:#}"), "Health server stopped");
        }
    });

    driver.start_with_shutdown(shutdown).await
}
