//! Operation descriptors.
//!
//! A descriptor is the static metadata attached to an operation when it is
//! registered with the pipeline. It replaces annotation-driven interception:
//! every instrumented call site names its descriptor explicitly.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default slow-operation threshold in milliseconds.
pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;

/// Where an operation originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCategory {
    Http,
    Business,
    External,
}

impl OperationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::Http => "http",
            OperationCategory::Business => "business",
            OperationCategory::External => "external",
        }
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of how an invocation is logged and measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    name: Cow<'static, str>,
    category: OperationCategory,
    log_args: bool,
    log_result: bool,
    slow_threshold: Duration,
}

impl OperationDescriptor {
    /// Create a descriptor with the default policy: arguments logged,
    /// results not logged, 1s slow threshold.
    pub fn new(name: impl Into<Cow<'static, str>>, category: OperationCategory) -> Self {
        Self {
            name: name.into(),
            category,
            log_args: true,
            log_result: false,
            slow_threshold: Duration::from_millis(DEFAULT_SLOW_THRESHOLD_MS),
        }
    }

    pub fn http(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, OperationCategory::Http)
    }

    pub fn business(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, OperationCategory::Business)
    }

    pub fn external(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, OperationCategory::External)
    }

    pub fn with_log_args(mut self, enabled: bool) -> Self {
        self.log_args = enabled;
        self
    }

    pub fn with_log_result(mut self, enabled: bool) -> Self {
        self.log_result = enabled;
        self
    }

    pub fn with_slow_threshold_ms(mut self, millis: u64) -> Self {
        self.slow_threshold = Duration::from_millis(millis);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> OperationCategory {
        self.category
    }

    pub fn log_args(&self) -> bool {
        self.log_args
    }

    pub fn log_result(&self) -> bool {
        self.log_result
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// True when `elapsed` strictly exceeds the slow threshold.
    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > self.slow_threshold
    }
}
