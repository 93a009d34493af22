//! Storage data model.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::observability::sanitize::{LogValue, Loggable};
use crate::storage::error::StorageError;

/// Content type assumed when none is supplied or recorded.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Reported as the uploader when metadata is rebuilt from a stat.
pub const UNKNOWN_UPLOADER: &str = "unknown";

/// A readable sequence of byte chunks. Consumed at most once.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

impl Loggable for ByteStream {
    fn log_value(&self) -> LogValue {
        LogValue::Stream
    }
}

/// Wrap an in-memory payload as a single-chunk stream.
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    stream::once(futures_util::future::ready(Ok(data.into()))).boxed()
}

/// Drain a stream into one buffer.
pub async fn collect_stream(stream: ByteStream) -> io::Result<Bytes> {
    let buf = stream
        .try_fold(BytesMut::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await?;
    Ok(buf.freeze())
}

/// Descriptive record of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub bucket: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
}

impl FileMetadata {
    /// Rebuild metadata from a backend stat. The uploader is not recorded by
    /// the backend, so it is reported as [`UNKNOWN_UPLOADER`].
    pub fn from_stat(bucket: &str, key: &str, stat: ObjectStat) -> Self {
        Self {
            storage_key: key.to_string(),
            original_name: key.to_string(),
            content_type: stat.content_type,
            size_bytes: stat.size,
            bucket: bucket.to_string(),
            uploaded_at: stat.last_modified,
            uploaded_by: UNKNOWN_UPLOADER.to_string(),
        }
    }

    /// Build a listing entry. Listings carry no content type.
    pub fn from_entry(bucket: &str, entry: ObjectEntry) -> Self {
        Self {
            original_name: entry.key.clone(),
            storage_key: entry.key,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            size_bytes: entry.size,
            bucket: bucket.to_string(),
            uploaded_at: entry.last_modified,
            uploaded_by: UNKNOWN_UPLOADER.to_string(),
        }
    }

    /// Lowercased extension of the original name, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.original_name.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn is_document(&self) -> bool {
        self.content_type == "application/pdf"
            || self.content_type.starts_with("text/")
            || self.content_type.contains("document")
    }
}

impl Loggable for FileMetadata {
    fn log_value(&self) -> LogValue {
        LogValue::opaque::<Self>()
    }
}

/// Metadata plus a content stream the caller must consume or drop.
pub struct FileData {
    metadata: FileMetadata,
    stream: ByteStream,
}

impl FileData {
    pub fn new(metadata: FileMetadata, stream: ByteStream) -> Self {
        Self { metadata, stream }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn into_parts(self) -> (FileMetadata, ByteStream) {
        (self.metadata, self.stream)
    }

    /// Read the whole content into memory.
    pub async fn bytes(self) -> io::Result<Bytes> {
        collect_stream(self.stream).await
    }
}

impl fmt::Debug for FileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileData")
            .field("metadata", &self.metadata)
            .field("stream", &LogValue::Stream)
            .finish()
    }
}

impl Loggable for FileData {
    fn log_value(&self) -> LogValue {
        LogValue::opaque::<Self>()
    }
}

/// Backend view of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub content_type: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Lazily produced listing of a bucket. Per-item failures surface as
/// `Err` items; nothing is read until the stream is polled.
pub struct FileListing {
    inner: BoxStream<'static, Result<FileMetadata, StorageError>>,
}

impl FileListing {
    pub fn new(inner: BoxStream<'static, Result<FileMetadata, StorageError>>) -> Self {
        Self { inner }
    }

    /// Drain the listing, stopping at the first failure.
    pub async fn collect_all(self) -> Result<Vec<FileMetadata>, StorageError> {
        self.try_collect().await
    }
}

impl Stream for FileListing {
    type Item = Result<FileMetadata, StorageError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for FileListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileListing")
    }
}

impl Loggable for FileListing {
    fn log_value(&self) -> LogValue {
        LogValue::opaque::<Self>()
    }
}
