//! TillSync relay.
//!
//! Runs the reference sync target for local development and end-to-end
//! testing. State is held in memory and lost on exit.
//!
//! Usage:
//!   tillsync-relay --port 8787

use anyhow::{Context, Result};
use clap::Parser;
use tillsync_relay::{build_router, RelayState};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "tillsync-relay")]
#[command(about = "TillSync reference sync target")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8787")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("TillSync relay listening on {}", addr);

    axum::serve(listener, build_router(RelayState::new()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
