//! MediaGate gateway - access-controlled, audited file serving.
//!
//! Issues and verifies signed download links, resolves caller identities
//! from bearer credentials, and records a deduplicated audit trail of media
//! access.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use service::memory::{MemoryDirectory, MemoryStorage};
use service::state::Stores;
use service::{Config, GateState};

/// MediaGate gateway server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on for HTTP requests
    #[arg(short, long, default_value = "5244")]
    port: u16,

    /// Master API token; also the key material for signed links
    #[arg(long, env = "MEDIAGATE_TOKEN")]
    api_token: String,

    /// Signed-link lifetime in hours (0 = links never expire)
    #[arg(long, default_value = "0")]
    link_expiration: u64,

    /// Require a valid signature on every content path
    #[arg(long, default_value = "false")]
    sign_all: bool,

    /// Audit dedup window in seconds
    #[arg(long, default_value = "5")]
    dedup_window: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let log_level: tracing::Level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::info!("Starting MediaGate gateway");

    let config = Config {
        listen_addr: SocketAddr::from_str(&format!("0.0.0.0:{}", args.port))?,
        api_token: args.api_token,
        link_expiration_hours: args.link_expiration,
        sign_all: args.sign_all,
        dedup_window: Duration::from_secs(args.dedup_window),
        log_level,
    };

    // Default wiring: process-local directory and storage. A real
    // deployment substitutes its own store implementations here.
    let directory = Arc::new(MemoryDirectory::new());
    let stores = Stores {
        users: directory.clone(),
        metas: directory.clone(),
        sharings: directory,
        storage: Arc::new(MemoryStorage::new()),
    };

    let state = match GateState::from_config(&config, stores) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to create gateway state: {}", e);
            std::process::exit(1);
        }
    };

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let graceful_shutdown = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    };
    tokio::spawn(graceful_shutdown);

    let router = service::router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    tracing::info!("Gateway listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    let mut server_rx = shutdown_rx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_rx.changed().await;
        })
        .await?;

    tracing::info!("Gateway shutdown complete");
    Ok(())
}
