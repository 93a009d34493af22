//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Instrumented call (HTTP route, business operation, storage call)
//!     → pipeline.rs   (Invoke: correlation scope, start/success/error events)
//!         → context.rs    (task-local CorrelationContext + current span)
//!         → tracing.rs    (SpanRecord tree, exporter)
//!         → metrics.rs    (counters, timers, size buckets)
//!         → sanitize.rs   (argument/result rendering)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, JSON or human readable)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Span exporter (log line or in-memory)
//! ```
//!
//! # Design Decisions
//! - Correlation state is task-local, never process-global
//! - Operations are decorated explicitly with an OperationDescriptor
//! - Sink failures stop at the sink; business results pass through untouched

pub mod context;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod sanitize;
pub mod tracing;

pub use self::context::CorrelationContext;
pub use self::descriptor::{OperationCategory, OperationDescriptor};
pub use self::error::{ErrorKind, SinkError};
pub use self::metrics::{MetricsRecorder, SizeBucket};
pub use self::pipeline::Pipeline;
pub use self::sanitize::{LogValue, Loggable};
pub use self::tracing::{BusinessContext, SpanStatus, TraceRecorder};
