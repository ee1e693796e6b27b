//! Object store abstraction and backends.
//!
//! The file manager only needs a handful of blob operations against a single
//! bucket: put, get, list, remove and a batch remove. `ObjectStore` is the seam
//! between the coordinators in `FileService` and the two backends:
//!
//! - [`S3ObjectStore`]: any S3-compatible service (MinIO, AWS S3, ...).
//! - [`FsObjectStore`]: a sharded directory tree on local disk.

mod local;
mod s3;

pub use self::local::FsObjectStore;
pub use self::s3::{S3ObjectStore, S3Settings};

use crate::models::stored_file::ObjectInfo;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;

/// Byte stream fed into [`ObjectStore::put`].
pub type UploadStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Byte stream returned by [`ObjectStore::get`].
pub type DownloadStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("object store error: {0}")]
    Backend(String),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// A key the batch remove could not delete.
#[derive(Debug)]
pub struct RemoveFailure {
    pub key: String,
    pub error: ObjectStoreError,
}

/// Blob operations against the configured bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name, used for logging.
    fn name(&self) -> &str;

    /// Store `body` under `key`, replacing any existing blob.
    ///
    /// Returns the number of bytes written.
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        body: UploadStream<'_>,
    ) -> ObjectStoreResult<u64>;

    /// Open a blob for streaming.
    async fn get(&self, key: &str) -> ObjectStoreResult<DownloadStream>;

    /// Enumerate every blob in the bucket, in backend-defined order.
    async fn list(&self) -> ObjectStoreResult<Vec<ObjectInfo>>;

    /// Remove a single blob. A key with nothing stored under it is not an
    /// error.
    async fn remove(&self, key: &str) -> ObjectStoreResult<()>;

    /// Remove every key received on `keys` until the channel closes.
    ///
    /// Per-key failures are returned rather than aborting the batch. The
    /// default drains the channel and removes keys one at a time; backends
    /// with a native multi-delete override it.
    async fn remove_many(&self, mut keys: mpsc::Receiver<String>) -> Vec<RemoveFailure> {
        let mut failures = Vec::new();
        while let Some(key) = keys.recv().await {
            if let Err(error) = self.remove(&key).await {
                failures.push(RemoveFailure { key, error });
            }
        }
        failures
    }

    /// Cheap reachability check used by `/readyz`.
    async fn check(&self) -> ObjectStoreResult<()>;
}
