use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use multirelay::{Config, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    let default_directive = if config.debug {
        "multirelay=debug,info"
    } else {
        "multirelay=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let port = config.port;
    let mut server = Server::new(config);
    server
        .start()
        .with_context(|| format!("failed to start relay on port {port}"))?;

    let stop = server.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            stop.stop();
        }
    });

    tokio::task::spawn_blocking(move || server.run())
        .await
        .context("event loop thread panicked")?
        .context("event loop failed")?;

    Ok(())
}
