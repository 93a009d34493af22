//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Record counters and timers for named operations
//! - Tag every series with the application identifier
//! - Classify payload sizes into coarse buckets
//! - Expose a Prometheus-compatible endpoint
//!
//! # Metrics
//! - `operation_invocations_total` (counter): pipeline invocations by operation, category, status
//! - `operation_duration_seconds` (histogram): pipeline invocation latency
//! - `storage_operation_duration_seconds` (histogram): object-store call latency by operation, status
//! - `storage_operations_total` (counter): completed uploads/downloads by operation
//! - `file_operations_total` (counter): file operations by operation, status, size bucket
//! - `business_events_total` (counter): domain events by event type, category
//!
//! # Design Decisions
//! - Recording never fails the caller: sink errors are logged and discarded
//! - The sink is a trait so tests can inspect recorded series

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::observability::error::SinkError;

/// Tag set of one metric series.
pub type Tags = BTreeMap<String, String>;

/// Tag carrying the application identifier.
pub const APPLICATION_TAG: &str = "application";

pub const OPERATION_INVOCATIONS_TOTAL: &str = "operation_invocations_total";
pub const OPERATION_DURATION_SECONDS: &str = "operation_duration_seconds";
pub const STORAGE_OPERATION_DURATION_SECONDS: &str = "storage_operation_duration_seconds";
pub const STORAGE_OPERATIONS_TOTAL: &str = "storage_operations_total";
pub const FILE_OPERATIONS_TOTAL: &str = "file_operations_total";
pub const BUSINESS_EVENTS_TOTAL: &str = "business_events_total";

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Build a tag set from pairs.
pub fn tags<I, K, V>(pairs: I) -> Tags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Coarse size classification used only for tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBucket {
    Small,
    Medium,
    Large,
    XLarge,
}

impl SizeBucket {
    /// `<1KiB` small, `<1MiB` medium, `<10MiB` large, else xlarge.
    pub fn from_bytes(size: u64) -> Self {
        if size < KIB {
            SizeBucket::Small
        } else if size < MIB {
            SizeBucket::Medium
        } else if size < 10 * MIB {
            SizeBucket::Large
        } else {
            SizeBucket::XLarge
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeBucket::Small => "small",
            SizeBucket::Medium => "medium",
            SizeBucket::Large => "large",
            SizeBucket::XLarge => "xlarge",
        }
    }
}

impl fmt::Display for SizeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for metric samples.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, tags: &Tags, value: u64) -> Result<(), SinkError>;
    fn record_duration(&self, name: &str, tags: &Tags, elapsed: Duration) -> Result<(), SinkError>;
}

/// Forwards samples to the process-wide `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCrateSink;

fn labels(tags: &Tags) -> Vec<Label> {
    tags.iter().map(|(k, v)| Label::new(k.clone(), v.clone())).collect()
}

impl MetricsSink for MetricsCrateSink {
    fn increment_counter(&self, name: &str, tags: &Tags, value: u64) -> Result<(), SinkError> {
        metrics::counter!(name.to_string(), labels(tags)).increment(value);
        Ok(())
    }

    fn record_duration(&self, name: &str, tags: &Tags, elapsed: Duration) -> Result<(), SinkError> {
        metrics::histogram!(name.to_string(), labels(tags)).record(elapsed.as_secs_f64());
        Ok(())
    }
}

type SeriesKey = (String, Tags);

/// In-memory sink for tests and embedders that want to inspect series.
#[derive(Debug, Default, Clone)]
pub struct MemoryMetricsSink {
    counters: Arc<DashMap<SeriesKey, u64>>,
    timings: Arc<DashMap<SeriesKey, Vec<Duration>>>,
}

fn matches(series: &Tags, filter: &[(&str, &str)]) -> bool {
    filter
        .iter()
        .all(|(k, v)| series.get(*k).map(String::as_str) == Some(*v))
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all counter series named `name` whose tags include `filter`.
    pub fn counter(&self, name: &str, filter: &[(&str, &str)]) -> u64 {
        self.counters
            .iter()
            .filter(|e| e.key().0 == name && matches(&e.key().1, filter))
            .map(|e| *e.value())
            .sum()
    }

    /// Number of timing samples named `name` whose tags include `filter`.
    pub fn timing_count(&self, name: &str, filter: &[(&str, &str)]) -> usize {
        self.timings
            .iter()
            .filter(|e| e.key().0 == name && matches(&e.key().1, filter))
            .map(|e| e.value().len())
            .sum()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn increment_counter(&self, name: &str, tags: &Tags, value: u64) -> Result<(), SinkError> {
        *self
            .counters
            .entry((name.to_string(), tags.clone()))
            .or_insert(0) += value;
        Ok(())
    }

    fn record_duration(&self, name: &str, tags: &Tags, elapsed: Duration) -> Result<(), SinkError> {
        self.timings
            .entry((name.to_string(), tags.clone()))
            .or_default()
            .push(elapsed);
        Ok(())
    }
}

/// A running timer started by [`MetricsRecorder::start_timer`].
#[derive(Debug)]
pub struct TimerHandle {
    name: String,
    started: Instant,
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Records counters and timers tagged with the application identifier.
#[derive(Clone)]
pub struct MetricsRecorder {
    application: Arc<str>,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsRecorder {
    pub fn new(application: impl Into<String>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            application: Arc::from(application.into()),
            sink,
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn record_counter(&self, name: &str, tags: Tags) {
        let tags = self.with_application(tags);
        if let Err(e) = self.sink.increment_counter(name, &tags, 1) {
            tracing::warn!(metric = name, error = %e, "Counter sample dropped");
        }
    }

    pub fn start_timer(&self, name: &str) -> TimerHandle {
        TimerHandle {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Stop a timer and record its elapsed time. Returns the elapsed time.
    pub fn stop_timer(&self, handle: TimerHandle, tags: Tags) -> Duration {
        let elapsed = handle.elapsed();
        self.record_duration(&handle.name, tags, elapsed);
        elapsed
    }

    pub fn record_duration(&self, name: &str, tags: Tags, elapsed: Duration) {
        let tags = self.with_application(tags);
        if let Err(e) = self.sink.record_duration(name, &tags, elapsed) {
            tracing::warn!(metric = name, error = %e, "Timing sample dropped");
        }
    }

    /// Count a file operation, tagged with its size bucket.
    pub fn record_file_operation(&self, operation: &str, status: &str, size_bytes: u64) {
        self.record_counter(
            FILE_OPERATIONS_TOTAL,
            tags([
                ("operation", operation),
                ("status", status),
                ("size_bucket", SizeBucket::from_bytes(size_bytes).as_str()),
            ]),
        );
    }

    /// Count a domain event such as `file_uploaded`.
    pub fn record_business_event(&self, event_type: &str, category: &str) {
        self.record_counter(
            BUSINESS_EVENTS_TOTAL,
            tags([("event_type", event_type), ("category", category)]),
        );
    }

    fn with_application(&self, mut tags: Tags) -> Tags {
        tags.insert(APPLICATION_TAG.to_string(), self.application.to_string());
        tags
    }
}

impl fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("application", &self.application)
            .finish()
    }
}

/// Install the Prometheus exporter with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), SinkError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SinkError::Metrics(e.to_string()))?;

    metrics::describe_counter!(OPERATION_INVOCATIONS_TOTAL, "Instrumented operation invocations");
    metrics::describe_histogram!(
        OPERATION_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Instrumented operation latency"
    );
    metrics::describe_histogram!(
        STORAGE_OPERATION_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Object store call latency"
    );
    metrics::describe_counter!(STORAGE_OPERATIONS_TOTAL, "Completed object store transfers");
    metrics::describe_counter!(FILE_OPERATIONS_TOTAL, "File operations by size bucket");
    metrics::describe_counter!(BUSINESS_EVENTS_TOTAL, "Business events");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    impl MetricsSink for BrokenSink {
        fn increment_counter(&self, _: &str, _: &Tags, _: u64) -> Result<(), SinkError> {
            Err(SinkError::Metrics("registry closed".into()))
        }

        fn record_duration(&self, _: &str, _: &Tags, _: Duration) -> Result<(), SinkError> {
            Err(SinkError::Metrics("registry closed".into()))
        }
    }

    #[test]
    fn test_size_buckets() {
        assert_eq!(SizeBucket::from_bytes(500), SizeBucket::Small);
        assert_eq!(SizeBucket::from_bytes(500 * KIB), SizeBucket::Medium);
        assert_eq!(SizeBucket::from_bytes(5 * MIB), SizeBucket::Large);
        assert_eq!(SizeBucket::from_bytes(50 * MIB), SizeBucket::XLarge);
    }

    #[test]
    fn test_size_bucket_breakpoints() {
        assert_eq!(SizeBucket::from_bytes(0), SizeBucket::Small);
        assert_eq!(SizeBucket::from_bytes(KIB - 1), SizeBucket::Small);
        assert_eq!(SizeBucket::from_bytes(KIB), SizeBucket::Medium);
        assert_eq!(SizeBucket::from_bytes(MIB), SizeBucket::Large);
        assert_eq!(SizeBucket::from_bytes(10 * MIB), SizeBucket::XLarge);
    }

    #[test]
    fn test_application_tag_always_present() {
        let sink = MemoryMetricsSink::new();
        let recorder = MetricsRecorder::new("file-gateway", Arc::new(sink.clone()));

        recorder.record_counter("events_total", tags([("kind", "a")]));
        recorder.record_counter("events_total", Tags::new());

        assert_eq!(sink.counter("events_total", &[("application", "file-gateway")]), 2);
        assert_eq!(sink.counter("events_total", &[("kind", "a")]), 1);
    }

    #[test]
    fn test_timer_round_trip() {
        let sink = MemoryMetricsSink::new();
        let recorder = MetricsRecorder::new("app", Arc::new(sink.clone()));

        let timer = recorder.start_timer(STORAGE_OPERATION_DURATION_SECONDS);
        assert_eq!(timer.name(), STORAGE_OPERATION_DURATION_SECONDS);
        recorder.stop_timer(timer, tags([("operation", "upload"), ("status", "success")]));

        assert_eq!(
            sink.timing_count(STORAGE_OPERATION_DURATION_SECONDS, &[("status", "success")]),
            1
        );
    }

    #[test]
    fn test_file_operation_size_tag() {
        let sink = MemoryMetricsSink::new();
        let recorder = MetricsRecorder::new("app", Arc::new(sink.clone()));

        recorder.record_file_operation("upload", "success", 5 * MIB);
        assert_eq!(
            sink.counter(FILE_OPERATIONS_TOTAL, &[("size_bucket", "large"), ("operation", "upload")]),
            1
        );
    }

    #[test]
    fn test_business_events_by_type_and_category() {
        let sink = MemoryMetricsSink::new();
        let recorder = MetricsRecorder::new("app", Arc::new(sink.clone()));

        recorder.record_business_event("file_uploaded", "files");
        recorder.record_business_event("file_uploaded", "files");
        recorder.record_business_event("file_deleted", "files");

        assert_eq!(
            sink.counter(BUSINESS_EVENTS_TOTAL, &[("event_type", "file_uploaded"), ("category", "files")]),
            2
        );
        assert_eq!(sink.counter(BUSINESS_EVENTS_TOTAL, &[("application", "app")]), 3);
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        let recorder = MetricsRecorder::new("app", Arc::new(BrokenSink));
        recorder.record_counter("c", Tags::new());
        let timer = recorder.start_timer("t");
        recorder.stop_timer(timer, Tags::new());
    }
}
