//! Per-invocation correlation state.
//!
//! The active correlation context and current span live in a tokio
//! task-local slot, entered with [`scope`] for the lifetime of one
//! invocation. Concurrent tasks never observe each other's slot, and the
//! slot is released when the scoped future completes or is dropped.

use std::future::Future;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::observability::tracing::SpanId;

/// Length of generated correlation ids.
pub const CORRELATION_ID_LEN: usize = 8;

/// Short opaque token identifying one invocation across its log lines.
pub fn generate_correlation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(CORRELATION_ID_LEN);
    id
}

/// Correlation id and start instant of one invocation.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    correlation_id: String,
    parent_id: Option<String>,
    started_at: Instant,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self {
            correlation_id: generate_correlation_id(),
            parent_id: None,
            started_at: Instant::now(),
        }
    }

    /// Context for a nested invocation. The enclosing context is referenced
    /// by id, never replaced.
    pub fn child_of(parent: &CorrelationContext) -> Self {
        Self {
            parent_id: Some(parent.correlation_id.clone()),
            ..Self::new()
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What an invocation publishes to the code it wraps.
#[derive(Debug, Clone)]
pub(crate) struct ActiveScope {
    pub(crate) correlation: CorrelationContext,
    pub(crate) span: Option<SpanId>,
}

tokio::task_local! {
    static ACTIVE: ActiveScope;
}

/// Run `fut` with `active` as the task's correlation scope.
pub(crate) async fn scope<F: Future>(active: ActiveScope, fut: F) -> F::Output {
    ACTIVE.scope(active, fut).await
}

/// The correlation context of the invocation running on this task, if any.
pub fn current_correlation() -> Option<CorrelationContext> {
    ACTIVE.try_with(|a| a.correlation.clone()).ok()
}

pub fn current_correlation_id() -> Option<String> {
    ACTIVE.try_with(|a| a.correlation.correlation_id.clone()).ok()
}

/// The span of the invocation running on this task, if any.
pub fn current_span_id() -> Option<SpanId> {
    ACTIVE.try_with(|a| a.span).ok().flatten()
}
