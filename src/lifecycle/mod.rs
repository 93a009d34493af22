//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! startup::run(config)
//!     → logging + Prometheus exporter
//!     → object store (memory | filesystem) → default bucket
//!     → pipeline → storage adapter → routes
//!     → bind listener → serve
//!
//! Ctrl-C / SIGTERM (signals.rs)
//!     → Shutdown::trigger (shutdown.rs)
//!     → axum graceful shutdown: stop accepting, finish in-flight transfers
//! ```
//!
//! Any startup failure is fatal and reported as a [`startup::StartupError`].

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
