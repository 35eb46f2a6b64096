//! Ember server binary.

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::SystemClock;
use ember_core::config::AppConfig;
use ember_metadata::MetadataStore;
use ember_server::{Collaborators, assemble, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ember - inference instance lifecycle service
#[derive(Parser, Debug)]
#[command(name = "emberd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "EMBER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the optional file and `EMBER_` variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // EMBER_CONFIG only names the file
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("EMBER_") && key != "EMBER_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: emberd --config /path/to/config.toml\n  \
             2. Environment variables: EMBER_PLATFORM__BASE_URL=http://platform \
             EMBER_BACKEND__BASE_URL=http://backend emberd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set EMBER_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("EMBER_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Ember v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    if config.server.metrics_enabled {
        ember_server::metrics::register_metrics();
        tracing::info!("Prometheus metrics registered");
    }

    let metadata = ember_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store initialized");

    let collaborators =
        Collaborators::from_config(&config).context("failed to build platform clients")?;

    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;

    let service = assemble(config, metadata, collaborators, Arc::new(SystemClock));
    let (state, dispatcher) = service.start_dispatcher();
    tracing::info!("Lifecycle event dispatcher started");

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // The router, and with it the last publisher, is gone; let queued events finish.
    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "Event dispatcher task failed");
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
