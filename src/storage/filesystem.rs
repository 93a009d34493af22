//! Directory-backed object store.
//!
//! # Layout
//! ```text
//! <root>/<bucket>/                 one directory per bucket
//! <root>/<bucket>/<encoded key>    object content
//! <root>/<bucket>/.meta/<encoded key>.json   content type sidecar
//! <root>/<bucket>/.tmp/<uuid>      in-flight uploads
//! ```
//!
//! Keys are flattened into a single file name: `%`, `/` and `\` are
//! percent-encoded, as is a leading `.` so objects never collide with the
//! hidden directories. Uploads stream into `.tmp/` and are renamed into
//! place only after the declared size is confirmed.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::storage::backend::{
    validate_bucket_name, validate_object_key, BackendError, ObjectListing, ObjectStore,
};
use crate::storage::types::{ByteStream, ObjectEntry, ObjectStat, DEFAULT_CONTENT_TYPE};

const META_DIR: &str = ".meta";
const TMP_DIR: &str = ".tmp";
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    /// Commit time of the upload. Older sidecars lack it; mtime is used then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stored_at: Option<DateTime<Utc>>,
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, BackendError> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BackendError> {
        validate_object_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(encode_key(key)))
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BackendError> {
        Ok(self
            .bucket_dir(bucket)?
            .join(META_DIR)
            .join(format!("{}.json", encode_key(key))))
    }

    /// Map a NotFound on an object path to the precise fault.
    async fn not_found(&self, bucket: &str, key: &str) -> BackendError {
        match self.bucket_exists(bucket).await {
            Ok(true) => BackendError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            Ok(false) => BackendError::NoSuchBucket(bucket.to_string()),
            Err(e) => e,
        }
    }

    async fn require_bucket(&self, bucket: &str) -> Result<PathBuf, BackendError> {
        let dir = self.bucket_dir(bucket)?;
        if !self.bucket_exists(bucket).await? {
            return Err(BackendError::NoSuchBucket(bucket.to_string()));
        }
        Ok(dir)
    }

    async fn read_sidecar(&self, bucket: &str, key: &str) -> Result<Option<Sidecar>, BackendError> {
        match fs::read(self.sidecar_path(bucket, key)?).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| BackendError::CorruptMetadata {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes a partially written upload unless disarmed.
struct TempUpload {
    path: Option<PathBuf>,
}

impl TempUpload {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, c) in key.chars().enumerate() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            '.' if i == 0 => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn modified_at(meta: &std::fs::Metadata) -> io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(meta.modified()?))
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        match fs::metadata(self.bucket_dir(bucket)?).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&self.root).await?;
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(BackendError::BucketAlreadyExists(bucket.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(dir.join(META_DIR)).await?;
        fs::create_dir_all(dir.join(TMP_DIR)).await?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut data: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let target = self.object_path(bucket, key)?;
        let dir = self.require_bucket(bucket).await?;
        fs::create_dir_all(dir.join(TMP_DIR)).await?;
        fs::create_dir_all(dir.join(META_DIR)).await?;

        let temp = TempUpload::new(dir.join(TMP_DIR).join(uuid::Uuid::new_v4().simple().to_string()));
        let mut file = fs::File::create(temp.path()).await?;
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > size {
                return Err(BackendError::SizeMismatch {
                    expected: size,
                    actual: written,
                });
            }
            file.write_all(&chunk).await?;
        }
        if written != size {
            return Err(BackendError::SizeMismatch {
                expected: size,
                actual: written,
            });
        }
        file.sync_all().await?;
        drop(file);

        let sidecar = serde_json::to_vec(&Sidecar {
            content_type: content_type.to_string(),
            stored_at: Some(Utc::now()),
        })
        .map_err(io::Error::other)?;
        fs::write(self.sidecar_path(bucket, key)?, sidecar).await?;
        fs::rename(temp.path(), &target).await?;
        temp.disarm();
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, BackendError> {
        let file = match fs::File::open(self.object_path(bucket, key)?).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(self.not_found(bucket, key).await)
            }
            Err(e) => return Err(e.into()),
        };

        let chunks = stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some(file)))
                }
                Err(e) => Some((Err(e), None)),
            }
        });
        Ok(chunks.boxed())
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, BackendError> {
        let meta = match fs::metadata(self.object_path(bucket, key)?).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(self.not_found(bucket, key).await),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(self.not_found(bucket, key).await)
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar = self.read_sidecar(bucket, key).await?;
        let last_modified = match sidecar.as_ref().and_then(|s| s.stored_at) {
            Some(stored_at) => stored_at,
            None => modified_at(&meta)?,
        };
        Ok(ObjectStat {
            content_type: sidecar
                .map(|s| s.content_type)
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: meta.len(),
            last_modified,
        })
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let path = self.object_path(bucket, key)?;
        self.require_bucket(bucket).await?;
        for target in [path, self.sidecar_path(bucket, key)?] {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<ObjectListing, BackendError> {
        let dir = self.bucket_dir(bucket)?;
        let entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackendError::NoSuchBucket(bucket.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let listing = stream::unfold(Some(entries), |state| async move {
            let mut entries = state?;
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => return None,
                    Err(e) => return Some((Err(BackendError::from(e)), None)),
                };
                let Some(key) = entry.file_name().to_str().and_then(|name| {
                    if name.starts_with('.') {
                        None
                    } else {
                        decode_key(name)
                    }
                }) else {
                    continue;
                };
                let meta = match entry.metadata().await {
                    Ok(meta) if meta.is_file() => meta,
                    Ok(_) => continue,
                    // Removed between read_dir and stat.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Some((Err(e.into()), None)),
                };
                let item = modified_at(&meta)
                    .map(|last_modified| ObjectEntry {
                        key,
                        size: meta.len(),
                        last_modified,
                    })
                    .map_err(BackendError::from);
                return Some((item, Some(entries)));
            }
        });
        Ok(listing.boxed())
    }
}
