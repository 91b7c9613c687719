use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod proxy;
mod rewrite;
mod runtime;
mod session;

use config::Config;
use proxy::RewritingProxy;

#[derive(Parser, Debug)]
#[command(name = "rewriting-reverse-proxy")]
#[command(about = "A transforming reverse proxy that re-serves pages under its own origin")]
struct Args {
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    #[arg(short, long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config).await?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rewriting reverse proxy");

    if args.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let proxy = Arc::new(RewritingProxy::new(config.clone())?);

    let server_task = {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.start().await {
                error!("Server error: {}", e);
            }
        })
    };

    info!(
        "Rewriting reverse proxy started on {}:{}",
        config.server.host, config.server.port
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = server_task => {
            error!("Main server task exited unexpectedly");
        }
    }

    info!("Rewriting reverse proxy shutdown complete");
    Ok(())
}
