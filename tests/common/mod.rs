//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use file_gateway::config::GatewayConfig;
use file_gateway::lifecycle::startup::build_server;
use file_gateway::lifecycle::Shutdown;
use file_gateway::observability::metrics::{MemoryMetricsSink, MetricsRecorder};
use file_gateway::observability::tracing::{MemorySpanExporter, TraceRecorder};
use file_gateway::observability::Pipeline;
use file_gateway::storage::backend::{BackendError, ObjectListing, ObjectStore};
use file_gateway::storage::types::{ByteStream, ObjectStat};
use file_gateway::storage::MemoryObjectStore;

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

/// One captured log event: level plus every recorded field, stringified.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn event(&self) -> Option<&str> {
        self.field("event")
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    pub fn all(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Pipeline events (those carrying an `event` field), in emission order.
    pub fn pipeline_events(&self) -> Vec<CapturedEvent> {
        self.all().into_iter().filter(|e| e.event().is_some()).collect()
    }

    pub fn with_event(&self, event: &str) -> Vec<CapturedEvent> {
        self.all()
            .into_iter()
            .filter(|e| e.event() == Some(event))
            .collect()
    }

    pub fn for_operation(&self, operation: &str) -> Vec<CapturedEvent> {
        self.pipeline_events()
            .into_iter()
            .filter(|e| e.field("operation") == Some(operation))
            .collect()
    }
}

struct CaptureLayer {
    logs: CapturedLogs,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        self.logs.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields,
        });
    }
}

/// A capturing subscriber for one future, attached with
/// `tracing::instrument::WithSubscriber::with_subscriber`.
pub fn capture_subscriber() -> (CapturedLogs, impl Subscriber + Send + Sync + 'static) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer { logs: logs.clone() });
    (logs, subscriber)
}

/// Capture every event on this thread until the guard drops. Use with the
/// default current-thread `#[tokio::test]` runtime.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer { logs: logs.clone() });
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub metrics: MemoryMetricsSink,
    pub spans: MemorySpanExporter,
}

pub fn test_pipeline() -> TestPipeline {
    let metrics = MemoryMetricsSink::new();
    let spans = MemorySpanExporter::new();
    let pipeline = Pipeline::new(
        MetricsRecorder::new("file-gateway-test", Arc::new(metrics.clone())),
        TraceRecorder::new(Arc::new(spans.clone())),
    );
    TestPipeline {
        pipeline,
        metrics,
        spans,
    }
}

// ---------------------------------------------------------------------------
// Fault injecting backend
// ---------------------------------------------------------------------------

/// Switchable faults for [`FaultyStore`].
#[derive(Default)]
pub struct Faults {
    /// Remove the object just before `get_object` reads it.
    pub vanish_on_get: AtomicBool,
    /// `stat_object` fails with an I/O error.
    pub stat_io_error: AtomicBool,
    /// `make_bucket` creates the bucket, then reports losing the race.
    pub lose_bucket_race: AtomicBool,
    /// `make_bucket` fails outright.
    pub bucket_create_fails: AtomicBool,
    /// Added latency on every primitive, in milliseconds.
    pub delay_ms: AtomicU64,
}

impl Faults {
    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Memory store wrapper that injects backend faults on demand.
#[derive(Clone, Default)]
pub struct FaultyStore {
    pub inner: MemoryObjectStore,
    pub faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pause(&self) {
        let delay = self.faults.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        self.pause().await;
        self.inner.bucket_exists(bucket).await
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        self.pause().await;
        if self.faults.bucket_create_fails.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::other("quota exhausted")));
        }
        self.inner.make_bucket(bucket).await?;
        if self.faults.lose_bucket_race.load(Ordering::SeqCst) {
            return Err(BackendError::BucketAlreadyExists(bucket.to_string()));
        }
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<(), BackendError> {
        self.pause().await;
        self.inner.put_object(bucket, key, data, size, content_type).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, BackendError> {
        self.pause().await;
        if self.faults.vanish_on_get.load(Ordering::SeqCst) {
            self.inner.remove_object(bucket, key).await?;
        }
        self.inner.get_object(bucket, key).await
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError> {
        self.pause().await;
        if self.faults.stat_io_error.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::other("connection reset")));
        }
        self.inner.stat_object(bucket, key).await
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        self.pause().await;
        self.inner.remove_object(bucket, key).await
    }

    async fn list_objects(&self, bucket: &str) -> Result<ObjectListing, BackendError> {
        self.pause().await;
        self.inner.list_objects(bucket).await
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Serve the gateway on an ephemeral port.
pub async fn spawn_gateway(
    mut config: GatewayConfig,
    store: Arc<dyn ObjectStore>,
    pipeline: Pipeline,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();
    config.observability.metrics_enabled = false;

    let server = build_server(config, store, pipeline);
    let shutdown = Shutdown::new();
    let stopped = shutdown.notified();
    let handle = tokio::spawn(server.run(listener, stopped));

    TestServer {
        addr,
        shutdown,
        handle,
    }
}
