use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinsart::config::Config;
use pinsart::AppState;

#[derive(Parser, Debug)]
#[command(name = "pinsart")]
#[command(author, version, about = "Marketplace backend for Pinsart Déco", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "pinsart.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the listen address
    #[arg(long, env = "PINSART_HOST")]
    host: Option<String>,

    /// Override the API port
    #[arg(short, long, env = "PINSART_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.api_port = port;
    }

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Pinsart v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;
    let uploads_dir = config.uploads_dir();
    std::fs::create_dir_all(&uploads_dir)
        .with_context(|| format!("Failed to create uploads directory: {}", uploads_dir.display()))?;

    let db = pinsart::db::init(&config.server.data_dir).await?;

    pinsart::api::auth::ensure_admin_user(&db, &config).await?;

    if !config.email.is_configured() {
        tracing::warn!("SMTP is not configured, account emails will only be logged");
    }

    let metrics_handle = pinsart::api::metrics::init_metrics()?;
    let state = Arc::new(AppState::new(config.clone(), db).with_metrics(metrics_handle));

    pinsart::api::rate_limit::spawn_cleanup_task(state.clone());

    let app = pinsart::api::create_router(state);

    let api_addr = format!("{}:{}", config.server.host, config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind {}", api_addr))?;

    tracing::info!("API server listening on http://{}", api_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
}
