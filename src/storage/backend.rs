//! Object store abstraction.
//!
//! The primitives an S3-compatible store offers, reduced to what the adapter
//! needs. Implementations report faults as [`BackendError`] and never log
//! on the hot path; the adapter owns instrumentation.

use std::io;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::storage::types::{ByteStream, ObjectEntry, ObjectStat};

/// Backend primitive fault.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("bucket '{0}' does not exist")]
    NoSuchBucket(String),

    #[error("object '{key}' does not exist in bucket '{bucket}'")]
    NoSuchKey { bucket: String, key: String },

    #[error("bucket '{0}' already exists")]
    BucketAlreadyExists(String),

    #[error("declared size {expected} bytes but stream produced {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("corrupt metadata for '{key}': {reason}")]
    CorruptMetadata { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BackendError {
    /// True for "bucket or object is absent" faults.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::NoSuchBucket(_) | BackendError::NoSuchKey { .. }
        )
    }
}

/// Lazily produced bucket listing.
pub type ObjectListing = BoxStream<'static, Result<ObjectEntry, BackendError>>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name, used in logs.
    fn name(&self) -> &'static str;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError>;

    /// Fails with [`BackendError::BucketAlreadyExists`] if another caller won.
    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError>;

    /// Store exactly `size` bytes from `data`. The stream is consumed.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<(), BackendError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, BackendError>;

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError>;

    /// Removing an absent object succeeds.
    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), BackendError>;

    async fn list_objects(&self, bucket: &str) -> Result<ObjectListing, BackendError>;
}

/// Bucket names are single path segments.
pub fn validate_bucket_name(bucket: &str) -> Result<(), BackendError> {
    let invalid = bucket.is_empty()
        || bucket.starts_with('.')
        || bucket.contains(['/', '\\', '\0'])
        || bucket.len() > 255;
    if invalid {
        return Err(BackendError::InvalidBucket(bucket.to_string()));
    }
    Ok(())
}

/// Keys may contain `/` but no empty, `.` or `..` segments and no NUL.
pub fn validate_object_key(key: &str) -> Result<(), BackendError> {
    let invalid = key.is_empty()
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(BackendError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_names() {
        assert!(validate_bucket_name("photos").is_ok());
        assert!(validate_bucket_name("team-a.archive").is_ok());
        assert!(validate_bucket_name("").is_err());
        assert!(validate_bucket_name("..").is_err());
        assert!(validate_bucket_name("a/b").is_err());
    }

    #[test]
    fn test_object_keys() {
        assert!(validate_object_key("report.pdf").is_ok());
        assert!(validate_object_key("2024/01/report.pdf").is_ok());
        assert!(validate_object_key("../etc/passwd").is_err());
        assert!(validate_object_key("a//b").is_err());
        assert!(validate_object_key("a/./b").is_err());
        assert!(validate_object_key("nul\0byte").is_err());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(BackendError::NoSuchBucket("b".into()).is_not_found());
        assert!(!BackendError::BucketAlreadyExists("b".into()).is_not_found());
        assert!(!BackendError::Io(io::Error::other("disk")).is_not_found());
    }
}
