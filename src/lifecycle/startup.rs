//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and the metrics exporter from configuration
//! - Build the storage backend, pipeline, adapter and server in order
//! - Bind the listener last and serve until a stop signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::schema::{GatewayConfig, ObservabilityConfig};
use crate::http::handlers::AppState;
use crate::http::server::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::forward_signals;
use crate::observability::error::SinkError;
use crate::observability::logging::init_logging;
use crate::observability::metrics::{init_metrics, MetricsCrateSink, MetricsRecorder};
use crate::observability::pipeline::Pipeline;
use crate::observability::tracing::TraceRecorder;
use crate::storage::adapter::{AdapterOperations, ObjectStorageAdapter};
use crate::storage::backend::{BackendError, ObjectStore};
use crate::storage::build_store;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to initialize metrics: {0}")]
    Metrics(#[from] SinkError),

    #[error("invalid address '{address}'")]
    Address { address: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to prepare bucket '{bucket}': {source}")]
    Bucket {
        bucket: String,
        #[source]
        source: BackendError,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Pipeline backed by the global `metrics` recorder and a logging span exporter.
pub fn build_pipeline(config: &ObservabilityConfig) -> Pipeline {
    Pipeline::new(
        MetricsRecorder::new(&config.application, Arc::new(MetricsCrateSink)),
        TraceRecorder::logging(),
    )
}

/// Wire the adapter and routes over an already-built store and pipeline.
pub fn build_server(config: GatewayConfig, store: Arc<dyn ObjectStore>, pipeline: Pipeline) -> HttpServer {
    let operations = AdapterOperations::with_slow_threshold_ms(config.storage.slow_threshold_ms);
    let storage = ObjectStorageAdapter::with_operations(store, pipeline, operations);
    HttpServer::new(config, AppState { storage })
}

/// Create the configured default bucket so the first listing of it succeeds.
async fn prepare_default_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<(), StartupError> {
    let created = match store.bucket_exists(bucket).await {
        Ok(true) => Ok(false),
        Ok(false) => match store.make_bucket(bucket).await {
            Ok(()) => Ok(true),
            Err(BackendError::BucketAlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
    .map_err(|source| StartupError::Bucket {
        bucket: bucket.to_string(),
        source,
    })?;
    tracing::info!(bucket, created, backend = store.name(), "Default bucket ready");
    Ok(())
}

fn init_observability(config: &ObservabilityConfig) -> Result<(), StartupError> {
    init_logging(config)?;
    if config.metrics_enabled {
        let addr = config
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address {
                address: config.metrics_address.clone(),
            })?;
        init_metrics(addr)?;
    }
    Ok(())
}

/// Start the gateway and serve until SIGINT or SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    init_observability(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.storage.backend,
        "file-gateway starting"
    );

    let store = build_store(&config.storage);
    prepare_default_bucket(store.as_ref(), &config.storage.default_bucket).await?;
    let pipeline = build_pipeline(&config.observability);
    let address = config.listener.bind_address.clone();
    let server = build_server(config, store, pipeline);

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;

    let shutdown = Shutdown::new();
    forward_signals(shutdown.clone());
    server
        .run(listener, shutdown.notified())
        .await
        .map_err(StartupError::Serve)?;

    tracing::info!("Shutdown complete");
    Ok(())
}
