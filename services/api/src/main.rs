use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wastenot_api::{
    blob_store, start_api_server, AppState, Config, HttpInferenceClient, TokenVerifier,
    UploadPolicy,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        backend = ?config.storage.backend,
        bucket = %config.storage.bucket,
        "Starting WasteNot relay API"
    );

    // Initialize metrics
    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    // Initialize components
    let store = blob_store::connect(&config.storage)
        .await
        .context("Failed to initialize blob store")?;

    let inference = Arc::new(
        HttpInferenceClient::new(&config.inference)
            .context("Failed to initialize AI service client")?,
    );

    let verifier = TokenVerifier::from_config(&config.auth).map(Arc::new);
    if verifier.is_none() {
        warn!("No JWT secret configured, image fetch and delete routes are disabled");
    }

    let api_state = AppState {
        store,
        inference,
        upload_policy: Arc::new(UploadPolicy::from(&config.upload)),
        verifier,
        include_key: config.upload.include_key,
    };

    info!("Relay API starting");

    // Serve until SIGINT/SIGTERM, letting in-flight requests finish
    start_api_server(api_state, &config.api, shutdown_signal())
        .await
        .context("Relay API server failed")?;

    info!("Relay API stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
