//! Kiosk sync agent entry point

use anyhow::{Context, Result};
use clap::Parser;
use kiosk_config::KioskConfig;
use kiosk_network::SyncClient;
use kiosk_sync_agent::{client_config, init_tracing, run};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay, read from environments/<name>.toml next to the config file
    #[arg(short, long)]
    environment: Option<String>,

    /// Sync server address
    #[arg(long)]
    address: Option<String>,

    /// Sync server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Device name stamped on outbound messages
    #[arg(long)]
    device_name: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = KioskConfig::load(args.config.as_deref(), args.environment.as_deref())
        .context("Failed to load configuration")?;
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(name) = args.device_name {
        config.device.name = name;
    }
    config.validate()?;

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_tracing(&config.logging)?;
    info!("Starting kiosk sync agent");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        endpoint = %config.endpoint(),
        device = %config.device.name,
        "Configuration loaded"
    );

    let client = SyncClient::new(client_config(&config))?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    run(client, shutdown).await
}
