//! Instrumented object storage adapter.
//!
//! Every public operation runs through the [`Pipeline`] as an `external`
//! operation. Inside the invocation the adapter tags the current span with
//! storage attributes and records transfer timers, file-operation counters
//! and size buckets.

use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::observability::descriptor::OperationDescriptor;
use crate::observability::metrics::{tags, STORAGE_OPERATIONS_TOTAL, STORAGE_OPERATION_DURATION_SECONDS};
use crate::observability::pipeline::Pipeline;
use crate::observability::sanitize::LogValue;
use crate::storage::backend::{BackendError, ObjectStore};
use crate::storage::error::StorageError;
use crate::storage::types::{ByteStream, FileData, FileListing, FileMetadata};

/// Descriptors for the adapter's operations, fixed at construction.
#[derive(Debug, Clone)]
pub struct AdapterOperations {
    pub upload: OperationDescriptor,
    pub download: OperationDescriptor,
    pub exists: OperationDescriptor,
    pub delete: OperationDescriptor,
    pub metadata: OperationDescriptor,
    pub list: OperationDescriptor,
}

impl AdapterOperations {
    pub fn with_slow_threshold_ms(threshold_ms: u64) -> Self {
        let op = |name: &'static str| {
            OperationDescriptor::external(name).with_slow_threshold_ms(threshold_ms)
        };
        Self {
            upload: op("storage.upload"),
            download: op("storage.download"),
            exists: op("storage.exists").with_log_result(true),
            delete: op("storage.delete"),
            metadata: op("storage.get_metadata"),
            list: op("storage.list_files"),
        }
    }
}

impl Default for AdapterOperations {
    fn default() -> Self {
        Self::with_slow_threshold_ms(crate::observability::descriptor::DEFAULT_SLOW_THRESHOLD_MS)
    }
}

/// Bucket-scoped file operations against an [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectStorageAdapter {
    store: Arc<dyn ObjectStore>,
    pipeline: Pipeline,
    ops: Arc<AdapterOperations>,
}

fn require(field: &str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::Validation(format!("{} must not be blank", field)));
    }
    Ok(())
}

impl ObjectStorageAdapter {
    pub fn new(store: Arc<dyn ObjectStore>, pipeline: Pipeline) -> Self {
        Self::with_operations(store, pipeline, AdapterOperations::default())
    }

    pub fn with_operations(
        store: Arc<dyn ObjectStore>,
        pipeline: Pipeline,
        ops: AdapterOperations,
    ) -> Self {
        Self {
            store,
            pipeline,
            ops: Arc::new(ops),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn operations(&self) -> &AdapterOperations {
        &self.ops
    }

    /// Store `stream` under `bucket/key`, creating the bucket if needed.
    ///
    /// Exactly `size_bytes` must be produced by the stream; anything else is
    /// a storage failure and nothing is stored.
    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        stream: ByteStream,
        content_type: &str,
        size_bytes: u64,
        uploaded_by: &str,
    ) -> Result<FileMetadata, StorageError> {
        self.pipeline
            .invoke(
                &self.ops.upload,
                &[&bucket, &key, &LogValue::Stream, &content_type, &size_bytes, &uploaded_by],
                move || async move {
                    require("bucket", bucket)?;
                    require("objectKey", key)?;
                    self.tag_target(bucket, key);
                    let tracer = self.pipeline.tracer();
                    tracer.tag_current("storage.content_type", content_type);
                    tracer.tag_current("storage.size", size_bytes.to_string());

                    let started = Utc::now();
                    let metrics = self.pipeline.metrics();
                    let timer = metrics.start_timer(STORAGE_OPERATION_DURATION_SECONDS);
                    let outcome = self
                        .put(bucket, key, stream, content_type, size_bytes)
                        .await;
                    let status = if outcome.is_ok() { "success" } else { "error" };
                    metrics.stop_timer(timer, tags([("operation", "upload"), ("status", status)]));
                    metrics.record_file_operation("upload", status, size_bytes);
                    outcome?;

                    metrics.record_counter(STORAGE_OPERATIONS_TOTAL, tags([("operation", "upload")]));
                    info!(bucket, key, size_bytes, "File uploaded");
                    Ok(FileMetadata {
                        storage_key: key.to_string(),
                        original_name: key.to_string(),
                        content_type: content_type.to_string(),
                        size_bytes,
                        bucket: bucket.to_string(),
                        uploaded_at: started,
                        uploaded_by: uploaded_by.to_string(),
                    })
                },
            )
            .await
    }

    /// Open `bucket/key` for reading. `None` if the object does not exist.
    ///
    /// The existence check and the fetch are separate backend calls; an
    /// object removed in between surfaces as a storage failure.
    pub async fn download(&self, bucket: &str, key: &str) -> Result<Option<FileData>, StorageError> {
        self.pipeline
            .invoke(&self.ops.download, &[&bucket, &key], move || async move {
                require("bucket", bucket)?;
                require("objectKey", key)?;
                self.tag_target(bucket, key);

                if !self.is_present(bucket, key).await {
                    debug!(bucket, key, "Download target not found");
                    return Ok(None);
                }

                let metrics = self.pipeline.metrics();
                let timer = metrics.start_timer(STORAGE_OPERATION_DURATION_SECONDS);
                let opened = async {
                    let stream = self
                        .store
                        .get_object(bucket, key)
                        .await
                        .map_err(|e| StorageError::storage("download", e))?;
                    let stat = self
                        .store
                        .stat_object(bucket, key)
                        .await
                        .map_err(|e| StorageError::storage("download", e))?;
                    Ok::<_, StorageError>((stream, stat))
                }
                .await;
                let status = if opened.is_ok() { "success" } else { "error" };
                metrics.stop_timer(timer, tags([("operation", "download"), ("status", status)]));
                let (stream, stat) = opened?;

                let metadata = FileMetadata::from_stat(bucket, key, stat);
                self.pipeline
                    .tracer()
                    .tag_current("storage.size", metadata.size_bytes.to_string());
                metrics.record_file_operation("download", status, metadata.size_bytes);
                metrics.record_counter(STORAGE_OPERATIONS_TOTAL, tags([("operation", "download")]));
                Ok(Some(FileData::new(metadata, stream)))
            })
            .await
    }

    /// True if `bucket/key` can be stat'ed. Any backend fault reads as absent.
    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        self.pipeline
            .invoke(&self.ops.exists, &[&bucket, &key], move || async move {
                require("bucket", bucket)?;
                require("objectKey", key)?;
                self.tag_target(bucket, key);
                Ok(self.is_present(bucket, key).await)
            })
            .await
    }

    /// Remove `bucket/key`. Removing an absent object is not an error.
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.pipeline
            .invoke(&self.ops.delete, &[&bucket, &key], move || async move {
                require("bucket", bucket)?;
                require("objectKey", key)?;
                self.tag_target(bucket, key);

                let metrics = self.pipeline.metrics();
                let timer = metrics.start_timer(STORAGE_OPERATION_DURATION_SECONDS);
                let outcome = self.store.remove_object(bucket, key).await;
                let status = if outcome.is_ok() { "success" } else { "error" };
                metrics.stop_timer(timer, tags([("operation", "delete"), ("status", status)]));
                outcome.map_err(|e| StorageError::storage("delete", e))?;

                metrics.record_counter(STORAGE_OPERATIONS_TOTAL, tags([("operation", "delete")]));
                info!(bucket, key, "File deleted");
                Ok(())
            })
            .await
    }

    /// Stat `bucket/key`. Not-found is `None`; other faults are failures.
    pub async fn get_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<FileMetadata>, StorageError> {
        self.pipeline
            .invoke(&self.ops.metadata, &[&bucket, &key], move || async move {
                require("bucket", bucket)?;
                require("objectKey", key)?;
                self.tag_target(bucket, key);

                match self.store.stat_object(bucket, key).await {
                    Ok(stat) => Ok(Some(FileMetadata::from_stat(bucket, key, stat))),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(StorageError::storage("get_metadata", e)),
                }
            })
            .await
    }

    /// Lazily list a bucket. Opening the listing is instrumented; entries
    /// are read from the backend as the returned stream is polled.
    pub async fn list_files(&self, bucket: &str) -> Result<FileListing, StorageError> {
        self.pipeline
            .invoke(&self.ops.list, &[&bucket], move || async move {
                require("bucket", bucket)?;
                self.tag_client();
                self.pipeline.tracer().tag_current("storage.bucket", bucket);

                let entries = self
                    .store
                    .list_objects(bucket)
                    .await
                    .map_err(|e| StorageError::storage("list_files", e))?;

                let owner = bucket.to_string();
                let listing = entries
                    .map_ok(move |entry| FileMetadata::from_entry(&owner, entry))
                    .map_err(|e| StorageError::storage("list_files", e))
                    .boxed();
                Ok(FileListing::new(listing))
            })
            .await
    }

    fn tag_client(&self) {
        let tracer = self.pipeline.tracer();
        tracer.tag_current("service.name", self.store.name());
        tracer.tag_current("span.kind", "client");
    }

    fn tag_target(&self, bucket: &str, key: &str) {
        self.tag_client();
        let tracer = self.pipeline.tracer();
        tracer.tag_current("storage.bucket", bucket);
        tracer.tag_current("storage.key", key);
    }

    async fn is_present(&self, bucket: &str, key: &str) -> bool {
        match self.store.stat_object(bucket, key).await {
            Ok(_) => true,
            Err(e) => {
                debug!(bucket, key, error = %e, "Existence check negative");
                false
            }
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        stream: ByteStream,
        content_type: &str,
        size_bytes: u64,
    ) -> Result<(), StorageError> {
        self.ensure_bucket(bucket).await?;
        self.store
            .put_object(bucket, key, stream, size_bytes, content_type)
            .await
            .map_err(|e| StorageError::storage("upload", e))
    }

    /// Create `bucket` if absent. Losing a creation race is success.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let exists = self
            .store
            .bucket_exists(bucket)
            .await
            .map_err(|e| StorageError::storage("ensure_bucket", e))?;
        if exists {
            return Ok(());
        }
        match self.store.make_bucket(bucket).await {
            Ok(()) => {
                info!(bucket, backend = self.store.name(), "Bucket created");
                Ok(())
            }
            Err(BackendError::BucketAlreadyExists(_)) => {
                debug!(bucket, "Bucket created concurrently");
                Ok(())
            }
            Err(e) => Err(StorageError::storage("ensure_bucket", e)),
        }
    }
}

impl std::fmt::Debug for ObjectStorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorageAdapter")
            .field("backend", &self.store.name())
            .finish()
    }
}
