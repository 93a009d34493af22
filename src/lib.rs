//! File Gateway Library
//!
//! Bucket-scoped file storage over HTTP, with every route and storage call
//! running through an instrumentation pipeline (correlation ids, structured
//! events, slow-operation detection, spans and metrics).

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod storage;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::Pipeline;
pub use storage::ObjectStorageAdapter;
