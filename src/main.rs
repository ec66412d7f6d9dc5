//! Prediction worker daemon.
//!
//! Loads configuration, connects to PostgreSQL, applies migrations,
//! installs the Prometheus exporter, and drives the job processor until
//! SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use predict_core::config::AppConfig;
use predict_core::error::AppError;
use predict_database::DatabasePool;
use predict_worker::{
    JobMetrics, JobProcessor, MetricsSink, PrometheusMetrics, RetryPolicy, SubprocessExecutor,
    WorkerRunner,
};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Worker error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from an explicit file or the layered defaults
fn load_configuration() -> Result<AppConfig, AppError> {
    match std::env::var("PREDICT_CONFIG") {
        Ok(path) => AppConfig::load_from(&path),
        Err(_) => {
            let env = std::env::var("PREDICT_ENV").unwrap_or_else(|_| "development".to_string());
            AppConfig::load(&env)
        }
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Install the Prometheus exporter and return the sink the worker reports to
fn init_metrics(config: &AppConfig) -> Result<Arc<dyn MetricsSink>, AppError> {
    if !config.metrics.enabled {
        tracing::info!("Prometheus exporter disabled; keeping in-process counters only");
        return Ok(Arc::new(JobMetrics::new()));
    }

    let addr: SocketAddr = config.metrics.listen_addr.parse().map_err(|e| {
        AppError::configuration(format!(
            "Invalid metrics.listen_addr '{}': {}",
            config.metrics.listen_addr, e
        ))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::external_service(format!("Failed to start metrics exporter: {e}")))?;

    tracing::info!("Prometheus exporter listening on {}", addr);
    Ok(Arc::new(PrometheusMetrics::new()))
}

/// Main worker run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting predictd v{}", env!("CARGO_PKG_VERSION"));

    let db = DatabasePool::connect(&config.database).await?;
    db.migrate().await?;

    let metrics = init_metrics(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = if config.worker.enabled {
        let processor = JobProcessor::new(
            Arc::new(db.jobs()),
            Arc::new(SubprocessExecutor::new(config.executor.clone())),
            metrics,
            RetryPolicy::from(&config.worker),
        )
        .with_content_store(Arc::new(db.contents()));

        let runner = WorkerRunner::new(Arc::new(processor), config.worker.clone());
        Some(tokio::spawn(async move { runner.run(shutdown_rx).await }))
    } else {
        tracing::warn!("Worker disabled by configuration; idling until shutdown");
        None
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
            tracing::warn!("Worker did not stop within 30s");
        }
    }

    db.close().await;
    tracing::info!("predictd shut down gracefully");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
