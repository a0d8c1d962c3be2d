//! tailnet-ingress
//!
//! Exposes one upstream HTTP service to an overlay network, and optionally
//! to the public internet through a funnel listener.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                      INGRESS                          │
//!   overlay request    │  ┌──────────┐   ┌─────────────┐   ┌──────────────┐   │
//!   ───────────────────┼─▶│ listener │──▶│ prefix table│──▶│   rewriter   │   │
//!   funnel request     │  │ (per     │   │ deny → 404  │   │ URL, headers │   │
//!   ───────────────────┼─▶│ provenance)  └─────────────┘   │ identity     │   │
//!                      │  └──────────┘                     └──────┬───────┘   │
//!                      │                                          ▼           │
//!   response           │  ┌──────────┐   ┌─────────────┐   ┌──────────────┐   │
//!   ◀──────────────────┼──│ metrics  │◀──│  transport  │◀──│   upstream   │◀──┼── Upstream
//!                      │  └──────────┘   │ failure→502 │   └──────────────┘   │
//!                      │                 └─────────────┘                      │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tailnet_ingress::config::loader::load_config;
use tailnet_ingress::config::watcher::ConfigWatcher;
use tailnet_ingress::identity::IdentitySource;
use tailnet_ingress::lifecycle::signals::spawn_signal_handler;
use tailnet_ingress::observability::{logging, metrics, MetricsRecorder};
use tailnet_ingress::{IngressServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "tailnet-ingress")]
#[command(about = "Identity-aware reverse proxy for one upstream service", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tailnet-ingress.toml")]
    config: PathBuf,

    /// Reload routing and headers when the file changes
    #[arg(long)]
    watch: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if cli.check {
        println!("{}: configuration is valid", cli.config.display());
        return Ok(());
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tailnet-ingress starting");

    if config.observability.metrics_enabled {
        let addr: std::net::SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let (_watcher, updates) = if cli.watch {
        let (watcher, updates) = ConfigWatcher::new(&cli.config);
        (Some(watcher.run()?), Some(updates))
    } else {
        (None, None)
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = IngressServer::new(config, IdentitySource::LocalApi, Arc::new(MetricsRecorder::new()))?;
    server.run(updates, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
