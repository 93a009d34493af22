//! In-process object store.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};

use crate::storage::backend::{
    validate_bucket_name, validate_object_key, BackendError, ObjectListing, ObjectStore,
};
use crate::storage::types::{ByteStream, ObjectEntry, ObjectStat};

/// Download chunk size.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

type Bucket = Arc<DashMap<String, StoredObject>>;

/// Buckets and objects held in memory. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    buckets: Arc<DashMap<String, Bucket>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, bucket: &str) -> Result<Bucket, BackendError> {
        self.buckets
            .get(bucket)
            .map(|b| b.value().clone())
            .ok_or_else(|| BackendError::NoSuchBucket(bucket.to_string()))
    }

    fn no_such_key(bucket: &str, key: &str) -> BackendError {
        BackendError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        validate_bucket_name(bucket)?;
        match self.buckets.entry(bucket.to_string()) {
            Entry::Occupied(_) => Err(BackendError::BucketAlreadyExists(bucket.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Bucket::default());
                Ok(())
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut data: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<(), BackendError> {
        validate_object_key(key)?;
        let objects = self.bucket(bucket)?;

        let mut buf = BytesMut::with_capacity(size.min(CHUNK_SIZE as u64) as usize);
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
            if buf.len() as u64 > size {
                return Err(BackendError::SizeMismatch {
                    expected: size,
                    actual: buf.len() as u64,
                });
            }
        }
        if buf.len() as u64 != size {
            return Err(BackendError::SizeMismatch {
                expected: size,
                actual: buf.len() as u64,
            });
        }

        objects.insert(
            key.to_string(),
            StoredObject {
                data: buf.freeze(),
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, BackendError> {
        let data = self
            .bucket(bucket)?
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| Self::no_such_key(bucket, key))?;

        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError> {
        self.bucket(bucket)?
            .get(key)
            .map(|o| ObjectStat {
                content_type: o.content_type.clone(),
                size: o.data.len() as u64,
                last_modified: o.last_modified,
            })
            .ok_or_else(|| Self::no_such_key(bucket, key))
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        self.bucket(bucket)?.remove(key);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<ObjectListing, BackendError> {
        let mut entries: Vec<ObjectEntry> = self
            .bucket(bucket)?
            .iter()
            .map(|o| ObjectEntry {
                key: o.key().clone(),
                size: o.data.len() as u64,
                last_modified: o.last_modified,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }
}
