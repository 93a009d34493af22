//! Object storage subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP handler / CLI
//!     → adapter.rs   (ObjectStorageAdapter: validation, bucket lifecycle,
//!                     instrumented upload/download/list/delete/exists)
//!         → backend.rs   (ObjectStore trait: bucket and object primitives)
//!             → memory.rs      (in-process, tests and development)
//!             → filesystem.rs  (directory per bucket, atomic rename on upload)
//!             → s3.rs          (S3-compatible endpoint such as MinIO)
//! ```
//!
//! # Design Decisions
//! - Payloads move as chunked byte streams, never whole buffers
//! - Backend primitives are not transactional with each other
//! - Not-found is a value (`None`/`false`) for reads, a failure for listings

pub mod adapter;
pub mod backend;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod s3;
pub mod types;

use std::sync::Arc;

use crate::config::schema::{StorageBackendKind, StorageConfig};

pub use adapter::{AdapterOperations, ObjectStorageAdapter};
pub use backend::{BackendError, ObjectStore};
pub use error::StorageError;
pub use filesystem::FilesystemObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;
pub use types::{ByteStream, FileData, FileListing, FileMetadata};

/// Build the configured backend.
pub fn build_store(config: &StorageConfig) -> Arc<dyn ObjectStore> {
    match config.backend {
        StorageBackendKind::Memory => Arc::new(MemoryObjectStore::new()),
        StorageBackendKind::Filesystem => Arc::new(FilesystemObjectStore::new(&config.root)),
        StorageBackendKind::S3 => Arc::new(S3ObjectStore::new(&config.s3)),
    }
}
