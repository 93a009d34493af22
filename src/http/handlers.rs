//! File route handlers.

use std::io;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{StreamExt, TryStreamExt};

use crate::http::error::ApiError;
use crate::storage::adapter::ObjectStorageAdapter;
use crate::storage::types::{FileMetadata, DEFAULT_CONTENT_TYPE};

pub const X_UPLOADED_BY: &str = "x-uploaded-by";
pub const ANONYMOUS_UPLOADER: &str = "anonymous";

/// Category of the business events recorded by the file routes.
pub const FILE_EVENT_CATEGORY: &str = "files";

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub storage: ObjectStorageAdapter,
}

impl AppState {
    /// Tag the route span with the file it acts on.
    fn tag_file(&self, bucket: &str, key: &str) {
        self.storage
            .pipeline()
            .tracer()
            .tag_entity("file", &format!("{}/{}", bucket, key));
    }

    fn record_event(&self, event_type: &str) {
        self.storage
            .pipeline()
            .metrics()
            .record_business_event(event_type, FILE_EVENT_CATEGORY);
    }
}

fn header_or<'h>(headers: &'h HeaderMap, name: &str, fallback: &'h str) -> &'h str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
}

fn content_length(headers: &HeaderMap) -> Result<u64, ApiError> {
    let raw = headers
        .get(CONTENT_LENGTH)
        .ok_or_else(|| ApiError::BadRequest("Content-Length header is required".into()))?;
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ApiError::BadRequest("Content-Length header is not a number".into()))
}

/// `attachment; filename="<last key segment>"`, or bare `attachment` when
/// the name cannot be carried in a header.
fn content_disposition(name: &str) -> HeaderValue {
    let file_name: String = name
        .rsplit('/')
        .next()
        .unwrap_or(name)
        .chars()
        .filter(|c| *c != '"' && *c != '\\')
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub async fn upload_file(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<FileMetadata>, ApiError> {
    state.tag_file(&bucket, &key);
    let size = content_length(&headers)?;
    let content_type = header_or(&headers, CONTENT_TYPE.as_str(), DEFAULT_CONTENT_TYPE);
    let uploaded_by = header_or(&headers, X_UPLOADED_BY, ANONYMOUS_UPLOADER);

    let stream = body.into_data_stream().map_err(io::Error::other).boxed();
    let metadata = state
        .storage
        .upload(&bucket, &key, stream, content_type, size, uploaded_by)
        .await?;
    state.record_event("file_uploaded");
    Ok(Json(metadata))
}

pub async fn list_files(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<Vec<FileMetadata>>, ApiError> {
    state.storage.pipeline().tracer().tag_entity("bucket", &bucket);
    let files = state.storage.list_files(&bucket).await?.collect_all().await?;
    Ok(Json(files))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    state.tag_file(&bucket, &key);
    let data = state
        .storage
        .download(&bucket, &key)
        .await?
        .ok_or_else(|| ApiError::not_found(&bucket, &key))?;
    let (metadata, stream) = data.into_parts();

    let content_type = HeaderValue::from_str(&metadata.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let headers = [
        (CONTENT_TYPE, content_type),
        (CONTENT_LENGTH, HeaderValue::from(metadata.size_bytes)),
        (CONTENT_DISPOSITION, content_disposition(&metadata.original_name)),
    ];
    state.record_event("file_downloaded");
    Ok((headers, Body::from_stream(stream)).into_response())
}

pub async fn file_metadata(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Json<FileMetadata>, ApiError> {
    state.tag_file(&bucket, &key);
    state
        .storage
        .get_metadata(&bucket, &key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&bucket, &key))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.tag_file(&bucket, &key);
    if !state.storage.exists(&bucket, &key).await? {
        return Err(ApiError::not_found(&bucket, &key));
    }
    state.storage.delete(&bucket, &key).await?;
    state.record_event("file_deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `true` or `false` as the JSON body; never 404.
pub async fn file_exists(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Json<bool>, ApiError> {
    state.tag_file(&bucket, &key);
    Ok(Json(state.storage.exists(&bucket, &key).await?))
}
