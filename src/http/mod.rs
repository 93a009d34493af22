//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, timeout, body limit, trace)
//!     → middleware.rs (one pipeline invocation per request, per-route descriptor)
//!         → client_ip.rs (client address for the start event)
//!     → handlers.rs (file routes → ObjectStorageAdapter)
//!     → error.rs (ApiError → JSON error body + failure report)
//!     → Send to client
//! ```

pub mod client_ip;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use error::ApiError;
pub use handlers::AppState;
pub use middleware::{RouteInstrumentation, X_REQUEST_ID};
pub use server::HttpServer;
