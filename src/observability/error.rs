//! Instrumentation error types.

use std::convert::Infallible;
use thiserror::Error;

/// Failure inside a log/metric/trace sink.
///
/// Always caught at the sink boundary; never reaches the wrapped operation.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("metrics sink unavailable: {0}")]
    Metrics(String),

    #[error("span exporter unavailable: {0}")]
    Exporter(String),
}

/// Coarse classification of an error for the `error_kind` log field.
pub trait ErrorKind {
    fn kind(&self) -> &'static str;
}

impl ErrorKind for Infallible {
    fn kind(&self) -> &'static str {
        match *self {}
    }
}

impl ErrorKind for std::io::Error {
    fn kind(&self) -> &'static str {
        "IoError"
    }
}
