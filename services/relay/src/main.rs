use anyhow::{Context, Result};
use relay_service::{start_api_server, AppState, Config, S3Storage, StorageRelay};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment may already be populated
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting relay service"
    );

    // Initialize metrics
    if config.service.metrics_enabled {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let storage = S3Storage::new(&config.s3, &config.upload)
        .await
        .context("Failed to initialize S3 storage")?;
    let relay = Arc::new(StorageRelay::new(
        Arc::new(storage),
        config.s3.upload_concurrency,
    ));

    // Create API state
    let state = AppState::new(relay, &config);

    // Serve until SIGINT/SIGTERM
    start_api_server(state, &config, shutdown_signal()).await?;

    info!("Relay service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    // Handler spans carry file counts and folders; keep them on every event
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_current_span(true).with_span_list(false))
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
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

    let signal = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    info!(signal, "Draining in-flight uploads before shutdown");
}
