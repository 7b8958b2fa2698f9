mod api;
mod classifier;
mod config;
mod error;
mod record;
mod retention;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use api::AppState;
use classifier::CommandClassifier;
use config::{Config, StorageEngine};
use retention::spawn_retention_task;
use store::{AnalysisStore, MemoryAnalysisStore, PostgresAnalysisStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting analysis service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Build the store for the configured engine
    let store = build_store(&config)
        .await
        .context("Failed to initialize analysis store")?;

    // Schema setup is fatal when it fails; an incompatible table needs an
    // operator, not a retry loop.
    store
        .initialize()
        .await
        .context("Failed to initialize analysis schema")?;

    // Ensure the upload staging directory exists
    tokio::fs::create_dir_all(&config.api.uploads_dir)
        .await
        .context("Failed to create uploads directory")?;

    let classifier = Arc::new(CommandClassifier::new(&config.classifier));

    let state = AppState {
        store: store.clone(),
        classifier,
        uploads_dir: config.api.uploads_dir.clone().into(),
        max_page_size: config.api.max_page_size,
    };

    // Spawn the retention task
    let shutdown = CancellationToken::new();
    let retention_handle = if config.retention.enabled {
        Some(spawn_retention_task(
            store.clone(),
            config.retention.keep_count,
            config.retention_interval(),
            shutdown.clone(),
        ))
    } else {
        None
    };

    // Start the API server
    let router = api::create_router(state, &config.api);
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind API address")?;

    info!(address = %addr, "Analysis API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!(error = %e, "API server error");
        }
    });

    info!("Analysis service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down analysis service");

    shutdown.cancel();
    if let Some(handle) = retention_handle {
        let _ = handle.await;
    }
    server_handle.abort();

    info!("Analysis service stopped");

    Ok(())
}

/// Construct the configured storage backend
async fn build_store(config: &Config) -> Result<Arc<dyn AnalysisStore>> {
    match config.database.engine {
        StorageEngine::Postgres => {
            let store = PostgresAnalysisStore::connect(&config.database)
                .await
                .context("Failed to connect to PostgreSQL")?;
            Ok(Arc::new(store))
        }
        StorageEngine::Memory => {
            info!("Using in-memory analysis store");
            Ok(Arc::new(MemoryAnalysisStore::new()))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
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
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
