// ABOUTME: `warden` binary entry point
// ABOUTME: Parses flags, loads .env and config, installs tracing, and runs the server

use clap::Parser;
use std::net::IpAddr;
use tracing_subscriber::EnvFilter;
use warden_cli::{run_server, Config};

const DEFAULT_LOG_FILTER: &str = "warden=info,tower_http=info";

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - sandboxed agent sessions over HTTP")]
#[command(version)]
struct Cli {
    /// Address to bind (overrides WARDEN_HOST)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on (overrides WARDEN_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port.filter(|p| *p != 0) {
        config.port = port;
    }

    run_server(config).await
}
