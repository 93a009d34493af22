//! S3-compatible object store (AWS S3, MinIO).
//!
//! Gateway buckets are S3 buckets. Uploads are buffered up to the declared
//! size before the single PUT; downloads and listings stream.

use std::io;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream as S3Body, DateTime as S3DateTime};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration, Object};
use aws_sdk_s3::Client;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};

use crate::config::schema::S3Config;
use crate::storage::backend::{
    validate_bucket_name, validate_object_key, BackendError, ObjectListing, ObjectStore,
};
use crate::storage::types::{ByteStream, ObjectEntry, ObjectStat, DEFAULT_CONTENT_TYPE};

/// Region that rejects an explicit location constraint on bucket creation.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    region: String,
}

impl S3ObjectStore {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "file-gateway",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .build();
        Self {
            client: Client::from_conf(sdk_config),
            region: config.region.clone(),
        }
    }

    /// A 404 without an error code does not say which of bucket or key is
    /// missing.
    async fn refine_not_found(&self, err: BackendError) -> BackendError {
        let BackendError::NoSuchKey { bucket, key } = err else {
            return err;
        };
        match self.bucket_exists(&bucket).await {
            Ok(true) => BackendError::NoSuchKey { bucket, key },
            Ok(false) => BackendError::NoSuchBucket(bucket),
            Err(e) => e,
        }
    }
}

/// Map an S3 error code or bare HTTP status to a precise fault.
fn classify(
    code: Option<&str>,
    status: Option<u16>,
    bucket: &str,
    key: Option<&str>,
) -> Option<BackendError> {
    let no_such_key = |key: &str| BackendError::NoSuchKey {
        bucket: bucket.to_string(),
        key: key.to_string(),
    };
    match (code, status) {
        (Some("NoSuchBucket"), _) => Some(BackendError::NoSuchBucket(bucket.to_string())),
        (Some("NoSuchKey"), _) => key.map(no_such_key),
        (Some("BucketAlreadyExists" | "BucketAlreadyOwnedByYou"), _) => {
            Some(BackendError::BucketAlreadyExists(bucket.to_string()))
        }
        (None | Some("NotFound"), Some(404)) => Some(match key {
            Some(key) => no_such_key(key),
            None => BackendError::NoSuchBucket(bucket.to_string()),
        }),
        _ => None,
    }
}

fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, bucket: &str, key: Option<&str>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    classify(err.code(), status, bucket, key)
        .unwrap_or_else(|| BackendError::Io(io::Error::other(DisplayErrorContext(err).to_string())))
}

fn to_utc(at: Option<&S3DateTime>) -> DateTime<Utc> {
    at.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_default()
}

fn entry(object: &Object) -> Option<ObjectEntry> {
    Some(ObjectEntry {
        key: object.key()?.to_string(),
        size: object.size().unwrap_or(0).max(0) as u64,
        last_modified: to_utc(object.last_modified()),
    })
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        validate_bucket_name(bucket)?;
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match map_sdk_error(e, bucket, None) {
                BackendError::NoSuchBucket(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        validate_bucket_name(bucket)?;
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map(|_| ())
            .map_err(|e| map_sdk_error(e, bucket, None))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut data: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<(), BackendError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        let length = i64::try_from(size).map_err(|_| BackendError::SizeMismatch {
            expected: size,
            actual: 0,
        })?;

        let mut buffer = BytesMut::new();
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            let written = (buffer.len() + chunk.len()) as u64;
            if written > size {
                return Err(BackendError::SizeMismatch {
                    expected: size,
                    actual: written,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        if buffer.len() as u64 != size {
            return Err(BackendError::SizeMismatch {
                expected: size,
                actual: buffer.len() as u64,
            });
        }

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .content_length(length)
            .body(S3Body::from(buffer.freeze()))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| map_sdk_error(e, bucket, Some(key)))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, BackendError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                let err = map_sdk_error(e, bucket, Some(key));
                return Err(self.refine_not_found(err).await);
            }
        };

        let chunks = stream::unfold(output.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(io::Error::other), body))
        });
        Ok(chunks.boxed())
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        let head = match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(head) => head,
            Err(e) => {
                let err = map_sdk_error(e, bucket, Some(key));
                return Err(self.refine_not_found(err).await);
            }
        };
        Ok(ObjectStat {
            content_type: head
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            size: head.content_length().unwrap_or(0).max(0) as u64,
            last_modified: to_utc(head.last_modified()),
        })
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| map_sdk_error(e, bucket, Some(key)))
    }

    async fn list_objects(&self, bucket: &str) -> Result<ObjectListing, BackendError> {
        if !self.bucket_exists(bucket).await? {
            return Err(BackendError::NoSuchBucket(bucket.to_string()));
        }

        let client = self.client.clone();
        let owner = bucket.to_string();
        // `Some(token)` fetches the next page; `None` ends the listing.
        let pages = stream::try_unfold(Some(None::<String>), move |state| {
            let client = client.clone();
            let bucket = owner.clone();
            async move {
                let Some(token) = state else {
                    return Ok::<_, BackendError>(None);
                };
                let page = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .set_continuation_token(token)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &bucket, None))?;
                let entries: Vec<ObjectEntry> = page.contents().iter().filter_map(entry).collect();
                let next = match (page.is_truncated(), page.next_continuation_token()) {
                    (Some(true), Some(token)) => Some(Some(token.to_string())),
                    _ => None,
                };
                Ok(Some((entries, next)))
            }
        });

        let listing = pages
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, BackendError>)))
            .try_flatten()
            .boxed();
        Ok(listing)
    }
}
