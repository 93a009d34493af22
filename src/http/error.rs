//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::http::middleware::FailureReport;
use crate::observability::error::ErrorKind;
use crate::storage::error::StorageError;

/// Failure returned by a file route.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("file '{key}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, key: String },

    #[error(transparent)]
    Storage(StorageError),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ApiError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        ApiError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Storage(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl ErrorKind for ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::NotFound { .. } => "NotFound",
            ApiError::Storage(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let report = FailureReport {
            kind: self.kind(),
            message: self.to_string(),
        };
        let body = ErrorBody {
            error: report.kind,
            message: report.message.clone(),
        };
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::BackendError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("b", "k").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(StorageError::Validation("blank".into())).status(),
            StatusCode::BAD_REQUEST
        );
        let backend = StorageError::storage("upload", BackendError::NoSuchBucket("b".into()));
        let err = ApiError::from(backend);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind(), "StorageFailure");
    }

    #[test]
    fn test_response_carries_failure_report() {
        let response = ApiError::not_found("b", "k").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response.extensions().get::<FailureReport>().unwrap();
        assert_eq!(report.kind, "NotFound");
        assert!(report.message.contains("'k'"));
    }
}
