//! runbridge development server
//!
//! Runs a framework behind the adapter with a plain HTTP front so it can be
//! exercised locally with curl or a browser.
//!
//! Usage:
//!   runbridge-server --config runbridge.yaml
//!   RUNBRIDGE_TRUSTED_HOSTNAME=api.example.com runbridge-server --port 8080

mod config;
mod demo;
mod host;

use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use demo::DemoApp;
use host::{HostState, invocation_router};
use runbridge_adapter::{DeliveryMode, serve_with};
use runbridge_observability::{HealthState, Metrics, init_logging};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Largest request body the development host accepts
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// runbridge - fetch-style frameworks on invocation hosts
#[derive(Parser)]
#[command(name = "runbridge-server")]
#[command(about = "Development host for the runbridge adapter", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "RUNBRIDGE_CONFIG")]
    config: Option<String>,

    /// Address to bind
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Validate every invocation against this host
    #[arg(long, value_name = "HOSTNAME")]
    trusted_hostname: Option<String>,

    /// Buffer streamed bodies instead of streaming them
    #[arg(long)]
    buffered: bool,

    /// Log level or filter directive
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ServerConfig::default(),
    };

    // Env vars override the file, CLI flags override both
    config.merge_env();
    apply_cli(&mut config, &cli);

    init_logging(&config.logging)?;

    info!("Starting runbridge development server");
    if let Some(path) = &cli.config {
        info!("  Config file: {}", path);
    }
    info!("  Delivery: {:?}", config.delivery);
    info!("  Response constructor: {:?}", config.response_constructor);
    match &config.trusted_hostname {
        Some(hostname) => info!("  Trusted hostname: {}", hostname),
        None => warn!("  No trusted hostname configured; the Host header is trusted as sent"),
    }

    let metrics = Arc::new(Metrics::new()?);
    let options = config.listener_options(&metrics);
    let handler = serve_with(DemoApp::new(config.response_constructor), options).into_handler();

    let state = Arc::new(HostState {
        handler,
        trusted_hostname: config.trusted_hostname.clone(),
        max_body_bytes: MAX_REQUEST_BODY_BYTES,
    });
    let app = invocation_router(state, HealthState::new(metrics));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr).await?;

    info!("✅ runbridge listening on http://{}", addr);
    info!("   Try: curl http://{}/json", addr);
    info!("   Health: http://{}/healthz", addr);
    if config.metrics_enabled {
        info!("   Metrics: http://{}/metrics", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn apply_cli(config: &mut ServerConfig, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(hostname) = &cli.trusted_hostname {
        config.trusted_hostname = Some(hostname.clone());
    }
    if cli.buffered {
        config.delivery = DeliveryMode::Buffered;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
