//! Span recording.
//!
//! # Responsibilities
//! - Create spans parented to the task's current span
//! - Accept tags from the wrapped operation while a span is in flight
//! - Carry caller identity and business entity tags on the current span
//! - Finalize spans with a status and hand them to an exporter
//!
//! # Design Decisions
//! - In-flight spans live in a shared DashMap; no caller-side locking
//! - Ending a span never touches its parent
//! - Exporter failures are logged and dropped, never returned

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::observability::context;
use crate::observability::error::SinkError;

/// Identifier of a span within one recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    InProgress,
    Success,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::InProgress => "in_progress",
            SpanStatus::Success => "success",
            SpanStatus::Error => "error",
        }
    }
}

/// A timed, taggable record of one instrumented operation.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub id: SpanId,
    pub parent: Option<SpanId>,
    pub name: String,
    pub tags: HashMap<String, String>,
    pub status: SpanStatus,
    pub started_at: Instant,
    /// Set when the span ends.
    pub duration: Option<Duration>,
}

impl SpanRecord {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Caller identity for a span. Absent or blank fields are not tagged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusinessContext {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub request_id: Option<String>,
}

impl BusinessContext {
    fn pairs(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("user.id", self.user_id.as_deref()),
            ("tenant.id", self.tenant_id.as_deref()),
            ("request.id", self.request_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some((key, v)),
            _ => None,
        })
    }
}

/// Destination for finished spans.
pub trait SpanExporter: Send + Sync {
    fn export(&self, span: &SpanRecord) -> Result<(), SinkError>;
}

/// Emits finished spans as debug log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpanExporter;

impl SpanExporter for LogSpanExporter {
    fn export(&self, span: &SpanRecord) -> Result<(), SinkError> {
        tracing::debug!(
            span_id = %span.id,
            parent_span_id = ?span.parent.map(|p| p.to_string()),
            span_name = %span.name,
            status = span.status.as_str(),
            duration_ms = span.duration.map(|d| d.as_millis() as u64),
            tags = ?span.tags,
            "Span finished"
        );
        Ok(())
    }
}

/// Retains finished spans in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySpanExporter {
    finished: Arc<Mutex<Vec<SpanRecord>>>,
}

impl MemorySpanExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all finished spans, in end order.
    pub fn finished(&self) -> Vec<SpanRecord> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Finished spans with the given name.
    pub fn named(&self, name: &str) -> Vec<SpanRecord> {
        self.finished().into_iter().filter(|s| s.name == name).collect()
    }
}

impl SpanExporter for MemorySpanExporter {
    fn export(&self, span: &SpanRecord) -> Result<(), SinkError> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(span.clone());
        Ok(())
    }
}

struct Inner {
    next_id: AtomicU64,
    active: DashMap<SpanId, SpanRecord>,
    exporter: Arc<dyn SpanExporter>,
}

/// Shared span registry. Cloning is cheap.
#[derive(Clone)]
pub struct TraceRecorder {
    inner: Arc<Inner>,
}

impl TraceRecorder {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                active: DashMap::new(),
                exporter,
            }),
        }
    }

    /// Recorder that logs finished spans.
    pub fn logging() -> Self {
        Self::new(Arc::new(LogSpanExporter))
    }

    /// Start a span parented to the task's current span.
    pub fn start_span<I, K, V>(&self, name: impl Into<String>, tags: I) -> SpanId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.start_child_span(name, context::current_span_id(), tags)
    }

    /// Start a span with an explicit parent.
    pub fn start_child_span<I, K, V>(
        &self,
        name: impl Into<String>,
        parent: Option<SpanId>,
        tags: I,
    ) -> SpanId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let id = SpanId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let record = SpanRecord {
            id,
            parent,
            name: name.into(),
            tags: tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            status: SpanStatus::InProgress,
            started_at: Instant::now(),
            duration: None,
        };
        self.inner.active.insert(id, record);
        id
    }

    /// Attach a tag to an in-flight span. Unknown spans are ignored.
    pub fn tag(&self, span: SpanId, key: impl Into<String>, value: impl Into<String>) {
        match self.inner.active.get_mut(&span) {
            Some(mut record) => {
                record.tags.insert(key.into(), value.into());
            }
            None => {
                tracing::debug!(span_id = %span, "Tag for unknown or finished span dropped");
            }
        }
    }

    /// Tag the task's current span, if there is one.
    pub fn tag_current(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        match self.current_span() {
            Some(span) => {
                self.tag(span, key, value);
                true
            }
            None => false,
        }
    }

    /// Tag the current span with `user.id`, `tenant.id` and `request.id`.
    pub fn tag_business_context(&self, business: &BusinessContext) -> bool {
        let Some(span) = self.current_span() else {
            return false;
        };
        for (key, value) in business.pairs() {
            self.tag(span, key, value);
        }
        true
    }

    /// Tag the current span with the business entity it acts on.
    pub fn tag_entity(&self, entity_type: &str, entity_id: &str) -> bool {
        let Some(span) = self.current_span() else {
            return false;
        };
        self.tag(span, "entity.type", entity_type);
        self.tag(span, "entity.id", entity_id);
        true
    }

    /// The span of the invocation running on this task.
    pub fn current_span(&self) -> Option<SpanId> {
        context::current_span_id()
    }

    /// Finalize a span and export it. The parent is left untouched.
    pub fn end_span(&self, span: SpanId, status: SpanStatus) {
        let Some((_, mut record)) = self.inner.active.remove(&span) else {
            tracing::debug!(span_id = %span, "End for unknown or finished span ignored");
            return;
        };
        record.status = status;
        record.duration = Some(record.started_at.elapsed());

        if let Err(e) = self.inner.exporter.export(&record) {
            tracing::warn!(span_id = %span, error = %e, "Span export failed; span dropped");
        }
    }

    /// Snapshot of an in-flight span.
    pub fn get(&self, span: SpanId) -> Option<SpanRecord> {
        self.inner.active.get(&span).map(|r| r.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }
}

impl fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("active", &self.inner.active.len())
            .finish()
    }
}
