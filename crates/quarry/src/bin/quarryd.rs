use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use quarry::api;
use quarry::config::Config;
use quarry::coordinator::Coordinator;

#[derive(Parser)]
#[command(name = "quarryd", about = "Self-hosted regex code-search service")]
struct Opts {
    /// Path to the configuration file
    #[arg(long, default_value = "config.json")]
    conf: std::path::PathBuf,
    /// HTTP listen address
    #[arg(long, default_value = ":6080")]
    addr: String,
    /// Serve UI assets from the source tree instead of the embedded copies
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = Opts::parse();
    let cfg = Config::load(&opts.conf)?;

    let coord = Arc::new(Coordinator::new(opts.conf.clone(), cfg));
    let live = coord.live().clone();

    // Startup runs in the background; every endpoint answers "not ready"
    // until the live map is published.
    {
        let coord = coord.clone();
        tokio::spawn(async move {
            if let Err(e) = coord.start().await {
                tracing::error!(error = %format!("{:#}", e), "startup failed");
                std::process::exit(1);
            }
        });
    }
    coord.spawn_config_watcher();
    spawn_shutdown_handler(coord.clone());

    let addr = normalize_addr(&opts.addr)?;
    tracing::info!(addr = %addr, "serving http");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {}", opts.addr))?;
    axum::serve(listener, api::router(live, opts.dev)).await?;
    Ok(())
}

/// `:6080` means all interfaces on that port.
fn normalize_addr(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .with_context(|| format!("invalid listen address {}", addr))
}

fn spawn_shutdown_handler(coord: Arc<Coordinator>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "could not install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        tracing::info!("graceful shutdown requested");
        coord.stop_all().await;
        std::process::exit(0);
    });
}
