//! Instrumentation pipeline.
//!
//! Wraps one unit of work with correlation-id propagation, structured
//! start/success/error events, slow-operation detection, span and metric
//! emission.
//!
//! # Invocation Flow
//! ```text
//! invoke(descriptor, args, op)
//!     → new CorrelationContext (child of the enclosing one, if any)
//!     → span parented to the enclosing span
//!     → operation.start
//!     → op() runs inside the task-local scope and a tracing span
//!     → operation.success | operation.error   (+ operation.slow)
//!     → span ended, metrics recorded, scope released
//! ```
//!
//! If the caller drops the invocation before `op` completes (timeout,
//! client disconnect) the guard takes the error path: `operation.error`
//! with kind `Cancelled` and `cancelled = true`, the slow check, and an
//! error status on the span. Errors from `op` are returned unchanged.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::Instrument;

use crate::observability::context::{self, ActiveScope, CorrelationContext};
use crate::observability::descriptor::OperationDescriptor;
use crate::observability::error::ErrorKind;
use crate::observability::logging::events;
use crate::observability::metrics::{
    tags, MetricsRecorder, OPERATION_DURATION_SECONDS, OPERATION_INVOCATIONS_TOTAL,
};
use crate::observability::sanitize::{render_args, Arg, Loggable};
use crate::observability::tracing::{SpanId, SpanStatus, TraceRecorder};

/// Error kind reported for invocations dropped before completion.
pub const CANCELLED_KIND: &str = "Cancelled";

const CANCELLED_MESSAGE: &str = "operation dropped before completion";

/// The instrumentation pipeline. Cloning is cheap; clones share recorders.
#[derive(Clone, Debug)]
pub struct Pipeline {
    metrics: MetricsRecorder,
    tracer: TraceRecorder,
}

impl Pipeline {
    pub fn new(metrics: MetricsRecorder, tracer: TraceRecorder) -> Self {
        Self { metrics, tracer }
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn tracer(&self) -> &TraceRecorder {
        &self.tracer
    }

    /// Run `op` as one instrumented invocation of `descriptor`.
    ///
    /// `args` are rendered eagerly, and only when the descriptor logs
    /// arguments. The result or error of `op` is returned untouched.
    pub fn invoke<'a, T, E, F, Fut>(
        &'a self,
        descriptor: &'a OperationDescriptor,
        args: &[Arg<'_>],
        op: F,
    ) -> impl Future<Output = Result<T, E>> + 'a
    where
        F: FnOnce() -> Fut + 'a,
        Fut: Future<Output = Result<T, E>> + 'a,
        T: Loggable + 'a,
        E: ErrorKind + fmt::Display + 'a,
    {
        let rendered_args = descriptor.log_args().then(|| render_args(args));

        async move {
            let mut invocation = Invocation::begin(self, descriptor, rendered_args);
            let active = ActiveScope {
                correlation: invocation.correlation.clone(),
                span: Some(invocation.span),
            };
            let log_span = invocation.log_span.clone();

            let result = context::scope(active, async move { op().await }.instrument(log_span)).await;

            match &result {
                Ok(value) => invocation.succeed(value),
                Err(err) => invocation.fail(err),
            }
            result
        }
    }
}

/// Bookkeeping for one in-flight invocation. Dropping it unfinished is the
/// cancellation path.
struct Invocation<'a> {
    pipeline: &'a Pipeline,
    descriptor: &'a OperationDescriptor,
    correlation: CorrelationContext,
    span: SpanId,
    log_span: tracing::Span,
    finished: bool,
}

impl<'a> Invocation<'a> {
    fn begin(
        pipeline: &'a Pipeline,
        descriptor: &'a OperationDescriptor,
        rendered_args: Option<String>,
    ) -> Self {
        let correlation = match context::current_correlation() {
            Some(parent) => CorrelationContext::child_of(&parent),
            None => CorrelationContext::new(),
        };
        let correlation_id = correlation.correlation_id();
        let category = descriptor.category().as_str();

        let span = pipeline.tracer.start_span(
            descriptor.name(),
            [
                ("operation.category", category),
                ("correlation.id", correlation_id),
            ],
        );
        if let Some(parent_id) = correlation.parent_id() {
            pipeline.tracer.tag(span, "correlation.parent_id", parent_id);
        }

        let log_span = tracing::info_span!(
            "operation",
            correlation_id = %correlation_id,
            operation = %descriptor.name(),
            category = category,
        );

        tracing::info!(
            parent: &log_span,
            event = events::START,
            correlation_id = %correlation_id,
            parent_correlation_id = correlation.parent_id(),
            operation = %descriptor.name(),
            category = category,
            args = rendered_args.as_deref(),
            "Operation started"
        );

        Self {
            pipeline,
            descriptor,
            correlation,
            span,
            log_span,
            finished: false,
        }
    }

    fn succeed<T: Loggable>(&mut self, value: &T) {
        self.finished = true;
        let elapsed = self.correlation.elapsed();
        let status_code = value.status_code();
        let result = self
            .descriptor
            .log_result()
            .then(|| value.log_value().to_string());

        tracing::info!(
            parent: &self.log_span,
            event = events::SUCCESS,
            correlation_id = %self.correlation.correlation_id(),
            operation = %self.descriptor.name(),
            category = self.descriptor.category().as_str(),
            duration_ms = elapsed.as_millis() as u64,
            status_code = status_code,
            result = result.as_deref(),
            "Operation succeeded"
        );
        self.check_slow(elapsed);

        let tracer = &self.pipeline.tracer;
        if let Some(code) = status_code {
            tracer.tag(self.span, "http.status_code", code.to_string());
        }
        tracer.tag(self.span, "status", SpanStatus::Success.as_str());
        tracer.end_span(self.span, SpanStatus::Success);
        self.record_metrics("success", elapsed);
    }

    fn fail<E: ErrorKind + fmt::Display>(&mut self, err: &E) {
        self.finished = true;
        let elapsed = self.correlation.elapsed();
        let message = err.to_string();

        tracing::error!(
            parent: &self.log_span,
            event = events::ERROR,
            correlation_id = %self.correlation.correlation_id(),
            operation = %self.descriptor.name(),
            category = self.descriptor.category().as_str(),
            duration_ms = elapsed.as_millis() as u64,
            error_kind = err.kind(),
            error = %message,
            "Operation failed"
        );
        self.check_slow(elapsed);

        self.end_with_error(err.kind(), message);
        self.record_metrics("error", elapsed);
    }

    fn cancel(&mut self) {
        self.finished = true;
        let elapsed = self.correlation.elapsed();

        tracing::error!(
            parent: &self.log_span,
            event = events::ERROR,
            correlation_id = %self.correlation.correlation_id(),
            operation = %self.descriptor.name(),
            category = self.descriptor.category().as_str(),
            duration_ms = elapsed.as_millis() as u64,
            error_kind = CANCELLED_KIND,
            error = CANCELLED_MESSAGE,
            cancelled = true,
            "Operation cancelled"
        );
        self.check_slow(elapsed);

        self.end_with_error(CANCELLED_KIND, CANCELLED_MESSAGE.into());
        self.record_metrics("cancelled", elapsed);
    }

    fn check_slow(&self, elapsed: Duration) {
        if !self.descriptor.is_slow(elapsed) {
            return;
        }
        tracing::warn!(
            parent: &self.log_span,
            event = events::SLOW,
            correlation_id = %self.correlation.correlation_id(),
            operation = %self.descriptor.name(),
            category = self.descriptor.category().as_str(),
            duration_ms = elapsed.as_millis() as u64,
            threshold_ms = self.descriptor.slow_threshold().as_millis() as u64,
            "Slow operation detected"
        );
    }

    fn end_with_error(&self, kind: &str, message: String) {
        let tracer = &self.pipeline.tracer;
        tracer.tag(self.span, "status", SpanStatus::Error.as_str());
        tracer.tag(self.span, "error.type", kind);
        tracer.tag(self.span, "error.message", message);
        tracer.end_span(self.span, SpanStatus::Error);
    }

    fn record_metrics(&self, status: &str, elapsed: Duration) {
        let series = tags([
            ("operation", self.descriptor.name()),
            ("category", self.descriptor.category().as_str()),
            ("status", status),
        ]);
        let metrics = &self.pipeline.metrics;
        metrics.record_duration(OPERATION_DURATION_SECONDS, series.clone(), elapsed);
        metrics.record_counter(OPERATION_INVOCATIONS_TOTAL, series);
    }
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::MemoryMetricsSink;
    use crate::observability::tracing::MemorySpanExporter;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct QuotaExceeded(u32);

    impl fmt::Display for QuotaExceeded {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "quota exceeded by {}", self.0)
        }
    }

    impl ErrorKind for QuotaExceeded {
        fn kind(&self) -> &'static str {
            "QuotaExceeded"
        }
    }

    fn pipeline() -> (Pipeline, MemoryMetricsSink, MemorySpanExporter) {
        let sink = MemoryMetricsSink::new();
        let exporter = MemorySpanExporter::new();
        let pipeline = Pipeline::new(
            MetricsRecorder::new("test-app", Arc::new(sink.clone())),
            TraceRecorder::new(Arc::new(exporter.clone())),
        );
        (pipeline, sink, exporter)
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let (pipeline, sink, exporter) = pipeline();
        let descriptor = OperationDescriptor::business("orders.total");

        let total: Result<u64, QuotaExceeded> =
            pipeline.invoke(&descriptor, &[&3u32], || async { Ok(42) }).await;

        assert_eq!(total, Ok(42));
        let spans = exporter.named("orders.total");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Success);
        assert_eq!(spans[0].tag("status"), Some("success"));
        assert_eq!(
            sink.counter(OPERATION_INVOCATIONS_TOTAL, &[("status", "success"), ("category", "business")]),
            1
        );
    }

    #[tokio::test]
    async fn test_error_returned_unchanged() {
        let (pipeline, sink, exporter) = pipeline();
        let descriptor = OperationDescriptor::business("orders.place");

        let result: Result<(), QuotaExceeded> = pipeline
            .invoke(&descriptor, &[], || async { Err(QuotaExceeded(7)) })
            .await;

        assert_eq!(result, Err(QuotaExceeded(7)));
        let span = &exporter.named("orders.place")[0];
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.tag("error.type"), Some("QuotaExceeded"));
        assert_eq!(span.tag("error.message"), Some("quota exceeded by 7"));
        assert_eq!(sink.counter(OPERATION_INVOCATIONS_TOTAL, &[("status", "error")]), 1);
    }

    #[tokio::test]
    async fn test_context_visible_inside_and_cleared_after() {
        let (pipeline, _, _) = pipeline();
        let descriptor = OperationDescriptor::business("inspect");

        let seen: Result<Option<String>, QuotaExceeded> = pipeline
            .invoke(&descriptor, &[], || async { Ok(context::current_correlation_id()) })
            .await;

        assert!(seen.unwrap().is_some());
        assert!(context::current_correlation_id().is_none());
        assert!(context::current_span_id().is_none());
    }

    #[tokio::test]
    async fn test_nested_invocation_creates_child_span() {
        let (pipeline, _, exporter) = pipeline();
        let outer = OperationDescriptor::http("GET /files");
        let inner = OperationDescriptor::external("storage.list");

        let result: Result<(), QuotaExceeded> = pipeline
            .invoke(&outer, &[], || async {
                let outer_id = context::current_correlation_id();
                let nested: Result<Option<String>, QuotaExceeded> = pipeline
                    .invoke(&inner, &[], || async {
                        Ok(context::current_correlation().and_then(|c| c.parent_id().map(String::from)))
                    })
                    .await;
                assert_eq!(nested.unwrap(), outer_id);
                assert_eq!(context::current_correlation_id(), outer_id);
                Ok(())
            })
            .await;
        assert!(result.is_ok());

        let outer_span = &exporter.named("GET /files")[0];
        let inner_span = &exporter.named("storage.list")[0];
        assert_eq!(inner_span.parent, Some(outer_span.id));
        assert_eq!(outer_span.parent, None);
    }

    #[tokio::test]
    async fn test_cancellation_ends_span_with_error() {
        let (pipeline, sink, exporter) = pipeline();
        let descriptor = OperationDescriptor::external("storage.download");

        let pending = pipeline.invoke(&descriptor, &[], || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), QuotaExceeded>(())
        });
        let outcome = tokio::time::timeout(Duration::from_millis(10), pending).await;

        assert!(outcome.is_err());
        let span = &exporter.named("storage.download")[0];
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.tag("error.type"), Some(CANCELLED_KIND));
        assert_eq!(sink.counter(OPERATION_INVOCATIONS_TOTAL, &[("status", "cancelled")]), 1);
        assert_eq!(pipeline.tracer().active_count(), 0);
        assert!(context::current_correlation_id().is_none());
    }
}
