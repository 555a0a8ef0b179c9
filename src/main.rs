use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally::config::TallyConfig;
use tally::http::{AppState, HttpServer};
use tally::ratelimit::RateLimiter;

/// Fixed-window rate limiting service.
#[derive(Parser, Debug)]
#[command(name = "tally", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to serve HTTP on, overriding the configuration
    #[arg(short, long)]
    addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tally Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TallyConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.http_addr = addr;
    }
    info!(
        http_addr = %config.server.http_addr,
        sweep_interval_secs = config.rate_limiting.sweep_interval_secs,
        "Configuration loaded"
    );

    let policies = config.rate_limiting.policy_table()?;
    for (name, policy) in policies.iter() {
        info!(
            policy = name,
            window_ms = policy.window_ms(),
            max_requests = policy.max_requests(),
            "Rate limit policy registered"
        );
    }

    // Initialize the rate limiter
    let rate_limiter = Arc::new(RateLimiter::start(config.rate_limiting.sweep_interval())?);
    info!("Rate limiter initialized");

    let server = HttpServer::new(
        config.server.http_addr,
        AppState::new(Arc::clone(&rate_limiter), policies),
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    rate_limiter.shutdown().await;

    info!("Tally Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
