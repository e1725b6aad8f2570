//! Cube ingress server
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                CUBE INGRESS                  │
//!                        │                                              │
//!   HTTP / WS (TCP)      │  ┌────────┐   ┌──────┐   ┌──────────┐        │
//!   ─────────────────────┼─▶│ server │──▶│ auth │──▶│ registry │──┐     │
//!                        │  └───┬────┘   └──────┘   └──────────┘  │     │
//!                        │      │ upgrade                         ▼     │
//!                        │  ┌───▼──────────────┐           ┌──────────┐ │
//!                        │  │ websocket/legacy │──────────▶│ handlers │ │
//!                        │  └──────────────────┘           │(collector)│ │
//!   UDP datagrams        │  ┌────────┐                     └────┬─────┘ │
//!   ─────────────────────┼─▶│  udp   │────────────────────────▶ │       │
//!                        │  └────────┘                          ▼       │
//!                        │                                ┌──────────┐  │
//!                        │                                │  store   │  │
//!                        │                                └──────────┘  │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use cube_ingress::config::load_config;
use cube_ingress::lifecycle::startup;
use cube_ingress::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "cube-ingress")]
#[command(about = "HTTP, WebSocket and UDP ingress for cube", long_about = None)]
struct Args {
    /// TOML configuration file; defaults plus environment when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cube-ingress starting");
    tracing::info!(
        http_address = %config.listener.http_addr(),
        udp_address = config.listener.udp_addr().as_deref().unwrap_or("disabled"),
        authenticator = %config.auth.authenticator,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
