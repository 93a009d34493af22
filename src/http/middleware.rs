//! Per-route instrumentation.
//!
//! Each route is registered with its own [`OperationDescriptor`]; the
//! middleware runs the rest of the stack as one pipeline invocation with
//! the request's method, path, query, client address, user agent and
//! request id as arguments. The route span is tagged with the caller's
//! user, tenant and request id. Responses carrying a [`FailureReport`] are
//! reported through the error path; everything else is a success with the
//! response status attached.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::MethodRouter;

use crate::http::client_ip::resolve_client_ip;
use crate::observability::descriptor::OperationDescriptor;
use crate::observability::error::ErrorKind;
use crate::observability::pipeline::Pipeline;
use crate::observability::sanitize::{LogValue, Loggable};
use crate::observability::tracing::BusinessContext;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_USER_ID: &str = "x-user-id";
pub const X_TENANT_ID: &str = "x-tenant-id";

/// Attached to error responses so the route's invocation reports a failure.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub kind: &'static str,
    pub message: String,
}

/// An error response travelling through the pipeline's error path.
struct RouteFailure {
    report: FailureReport,
    response: Response,
}

impl fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report.message)
    }
}

impl ErrorKind for RouteFailure {
    fn kind(&self) -> &'static str {
        self.report.kind
    }
}

impl Loggable for Response {
    fn log_value(&self) -> LogValue {
        LogValue::opaque::<Self>()
    }

    fn status_code(&self) -> Option<u16> {
        Some(self.status().as_u16())
    }
}

/// Pipeline handle plus the descriptor of one route.
#[derive(Clone)]
pub struct RouteInstrumentation {
    pipeline: Pipeline,
    descriptor: Arc<OperationDescriptor>,
}

impl RouteInstrumentation {
    pub fn new(pipeline: Pipeline, descriptor: OperationDescriptor) -> Self {
        Self {
            pipeline,
            descriptor: Arc::new(descriptor),
        }
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    /// Wrap `route` so every request to it is one instrumented invocation.
    pub fn apply<S>(self, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.route_layer(middleware::from_fn_with_state(self, instrument_route))
    }
}

fn header_str<'r>(request: &'r Request, name: &str) -> &'r str {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn business_context(request: &Request) -> BusinessContext {
    let owned = |name| Some(header_str(request, name).to_string());
    BusinessContext {
        user_id: owned(X_USER_ID),
        tenant_id: owned(X_TENANT_ID),
        request_id: owned(X_REQUEST_ID),
    }
}

pub async fn instrument_route(
    State(route): State<RouteInstrumentation>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = resolve_client_ip(request.headers(), peer);
    let user_agent = header_str(&request, USER_AGENT.as_str()).to_string();
    let request_id = header_str(&request, X_REQUEST_ID).to_string();
    let business = business_context(&request);
    let tracer = route.pipeline.tracer().clone();

    let outcome = route
        .pipeline
        .invoke(
            &route.descriptor,
            &[&method, &path, &query, &client_ip, &user_agent, &request_id],
            move || async move {
                tracer.tag_business_context(&business);
                let response = next.run(request).await;
                match response.extensions().get::<FailureReport>().cloned() {
                    Some(report) => Err(RouteFailure { report, response }),
                    None => Ok(response),
                }
            },
        )
        .await;

    match outcome {
        Ok(response) => response,
        Err(failure) => failure.response,
    }
}
