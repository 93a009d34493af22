//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all file routes
//! - Register each route with its own instrumentation descriptor
//! - Wire up middleware (tracing, timeout, body limit, request ID)
//! - Serve until the shutdown future resolves

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{delete, get, put, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::{GatewayConfig, ObservabilityConfig};
use crate::http::handlers::{self, AppState};
use crate::http::middleware::RouteInstrumentation;
use crate::observability::descriptor::OperationDescriptor;
use crate::observability::pipeline::Pipeline;

pub const FILES_ROUTE: &str = "/api/files/{bucket}";
pub const FILE_ROUTE: &str = "/api/files/{bucket}/{key}";
pub const METADATA_ROUTE: &str = "/api/files/{bucket}/{key}/metadata";
pub const EXISTS_ROUTE: &str = "/api/files/{bucket}/{key}/exists";

/// HTTP server for the file gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and state.
    pub fn new(config: GatewayConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let routes = RouteSet {
            pipeline: state.storage.pipeline().clone(),
            observability: &config.observability,
        };

        Router::new()
            .route(FILES_ROUTE, routes.wrap("GET", FILES_ROUTE, get(handlers::list_files)))
            .route(FILE_ROUTE, routes.wrap("PUT", FILE_ROUTE, put(handlers::upload_file)))
            .route(FILE_ROUTE, routes.wrap("GET", FILE_ROUTE, get(handlers::download_file)))
            .route(FILE_ROUTE, routes.wrap("DELETE", FILE_ROUTE, delete(handlers::delete_file)))
            .route(METADATA_ROUTE, routes.wrap("GET", METADATA_ROUTE, get(handlers::file_metadata)))
            .route(EXISTS_ROUTE, routes.wrap("GET", EXISTS_ROUTE, get(handlers::file_exists)))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server on `listener` until `shutdown` resolves, then drain.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.config.timeouts.request_secs,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

struct RouteSet<'c> {
    pipeline: Pipeline,
    observability: &'c ObservabilityConfig,
}

impl RouteSet<'_> {
    fn wrap(
        &self,
        method: &str,
        path: &str,
        route: MethodRouter<AppState>,
    ) -> MethodRouter<AppState> {
        let descriptor = OperationDescriptor::http(format!("{} {}", method, path))
            .with_log_args(self.observability.log_http_args)
            .with_slow_threshold_ms(self.observability.slow_threshold_ms);
        RouteInstrumentation::new(self.pipeline.clone(), descriptor).apply(route)
    }
}
