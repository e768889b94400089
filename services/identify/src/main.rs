use anyhow::{Context, Result};
use identify_service::{
    start_api_server, AppState, BlobStore, Classifier, Config, GeminiClassifier, HistoryService,
    IdentityToolkitVerifier, ImageService, Orchestrator, PgRecordStore, RecordStore, S3BlobStore,
    TokenVerifier,
};
use std::sync::Arc;
use tokio::signal;
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
        "Starting plant identification service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize external service handles
    let pg_store = PgRecordStore::new(&config.database)
        .await
        .context("Failed to initialize record store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        pg_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let record_store: Arc<dyn RecordStore> = Arc::new(pg_store);

    let blob_store: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 image store")?,
    );

    let classifier: Arc<dyn Classifier> = Arc::new(
        GeminiClassifier::new(&config.classifier).context("Failed to initialize classifier")?,
    );

    let token_verifier: Arc<dyn TokenVerifier> = Arc::new(
        IdentityToolkitVerifier::new(&config.auth)
            .context("Failed to initialize token verifier")?,
    );

    tokio::fs::create_dir_all(&config.uploads.temp_dir)
        .await
        .context("Failed to create upload directory")?;

    // Create API state
    let api_state = AppState {
        orchestrator: Arc::new(Orchestrator::new(
            classifier,
            blob_store.clone(),
            record_store.clone(),
            config.uploads.temp_dir.clone(),
        )),
        history: Arc::new(HistoryService::new(record_store.clone())),
        images: Arc::new(ImageService::new(blob_store)),
        token_verifier,
        record_store,
    };

    info!("Identification service started successfully");

    // Serve until a shutdown signal arrives, letting in-flight requests finish
    start_api_server(api_state, &config.api, shutdown_signal())
        .await
        .context("API server error")?;

    info!("Identification service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

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
