//! FileService coordinates the object store and the optional metadata
//! store for the four user-facing operations.
//!
//! The two stores are kept consistent by call ordering only:
//! - upload writes the blob first and records metadata second; a failed
//!   metadata insert is logged and the blob stays stored without a row.
//! - delete removes the blob first and the metadata rows second; a failed
//!   blob removal leaves the rows in place.
//!
//! Either way the stores can drift apart. Nothing here reconciles them.

use crate::{
    config::DeleteStrategy,
    models::{file_record::NewFileRecord, stored_file::StoredFile},
    services::{
        metadata_store::{MetadataError, MetadataStore},
        object_store::{
            DownloadStream, ObjectStore, ObjectStoreError, RemoveFailure, UploadStream,
        },
    },
};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Depth of the queue between the batch-delete producer and the store.
const BATCH_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum FileServiceError {
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub type FileServiceResult<T> = Result<T, FileServiceError>;

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub key: String,
    pub size: u64,
    /// Id of the metadata row, if one was written.
    pub record_id: Option<i64>,
}

/// Per-key outcome of a delete request. Only ever logged.
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub removed: Vec<String>,
    pub failed: Vec<RemoveFailure>,
}

#[derive(Clone)]
pub struct FileService {
    objects: Arc<dyn ObjectStore>,
    metadata: Option<Arc<dyn MetadataStore>>,
    delete_strategy: DeleteStrategy,
}

impl FileService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Option<Arc<dyn MetadataStore>>,
        delete_strategy: DeleteStrategy,
    ) -> Self {
        Self {
            objects,
            metadata,
            delete_strategy,
        }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn metadata(&self) -> Option<&Arc<dyn MetadataStore>> {
        self.metadata.as_ref()
    }

    /// Build the listing.
    ///
    /// With a metadata store the rows are returned most recent first; without
    /// one the object store is enumerated and its order kept as-is.
    pub async fn list_files(&self) -> FileServiceResult<Vec<StoredFile>> {
        match &self.metadata {
            Some(metadata) => {
                let rows = metadata.list().await?;
                Ok(rows.into_iter().map(StoredFile::from).collect())
            }
            None => {
                let objects = self.objects.list().await?;
                Ok(objects.into_iter().map(StoredFile::from).collect())
            }
        }
    }

    /// Store a new blob under `filename` and record it.
    ///
    /// A write failure aborts before any metadata is touched. A metadata
    /// failure is logged and swallowed.
    pub async fn upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        body: UploadStream<'_>,
    ) -> FileServiceResult<UploadOutcome> {
        let key = filename;
        let size = self.objects.put(key, content_type, body).await?;
        info!(key, size, store = self.objects.name(), "stored upload");

        let mut record_id = None;
        if let Some(metadata) = &self.metadata {
            let record = NewFileRecord {
                filename,
                s3_key: key,
                filesize: i64::try_from(size).unwrap_or(i64::MAX),
                upload_date: Utc::now(),
            };
            match metadata.insert(&record).await {
                Ok(row) => record_id = Some(row.id),
                Err(err) => warn!(key, "metadata insert failed, blob kept without a row: {}", err),
            }
        }

        Ok(UploadOutcome {
            key: key.to_string(),
            size,
            record_id,
        })
    }

    /// Open a blob for download.
    pub async fn download(&self, key: &str) -> FileServiceResult<DownloadStream> {
        debug!(key, "opening download");
        Ok(self.objects.get(key).await?)
    }

    /// Remove the selected keys. Never fails as a whole.
    pub async fn delete(&self, keys: Vec<String>) -> DeleteReport {
        let report = match (&self.metadata, self.delete_strategy) {
            (Some(metadata), _) => self.delete_with_metadata(metadata.as_ref(), keys).await,
            (None, DeleteStrategy::Sequential) => self.delete_sequential(keys).await,
            (None, DeleteStrategy::Batch) => self.delete_batch(keys).await,
        };
        for failure in &report.failed {
            warn!(key = %failure.key, "delete failed: {}", failure.error);
        }
        info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            "delete request finished"
        );
        report
    }

    /// Blob first, then rows, one key at a time.
    async fn delete_with_metadata(
        &self,
        metadata: &dyn MetadataStore,
        keys: Vec<String>,
    ) -> DeleteReport {
        let mut report = DeleteReport::default();
        for key in keys {
            if let Err(error) = self.objects.remove(&key).await {
                report.failed.push(RemoveFailure { key, error });
                continue;
            }
            match metadata.delete_by_key(&key).await {
                Ok(rows) => debug!(key = %key, rows, "removed metadata rows"),
                Err(err) => warn!(key = %key, "metadata delete failed, rows left behind: {}", err),
            }
            report.removed.push(key);
        }
        report
    }

    async fn delete_sequential(&self, keys: Vec<String>) -> DeleteReport {
        let mut report = DeleteReport::default();
        for key in keys {
            match self.objects.remove(&key).await {
                Ok(()) => report.removed.push(key),
                Err(error) => report.failed.push(RemoveFailure { key, error }),
            }
        }
        report
    }

    /// One producer task feeds the keys through a bounded channel into the
    /// store's batch remove; the producer is joined before returning.
    async fn delete_batch(&self, keys: Vec<String>) -> DeleteReport {
        let (tx, rx) = mpsc::channel(BATCH_QUEUE_DEPTH);
        let submitted = keys.clone();
        let producer = tokio::spawn(async move {
            for key in keys {
                if tx.send(key).await.is_err() {
                    break;
                }
            }
        });

        let failed = self.objects.remove_many(rx).await;
        if let Err(err) = producer.await {
            warn!("batch delete producer failed: {}", err);
        }

        let removed = submitted
            .into_iter()
            .filter(|key| !failed.iter().any(|failure| &failure.key == key))
            .collect();
        DeleteReport { removed, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::stored_file::ObjectInfo,
        services::{
            metadata_store::SqliteMetadataStore,
            object_store::{FsObjectStore, ObjectStoreResult},
        },
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{StreamExt, TryStreamExt, stream};
    use std::io;

    fn body(data: &'static [u8]) -> UploadStream<'static> {
        stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(data))]).boxed()
    }

    /// Local store that refuses to remove one key.
    struct RefusingStore {
        inner: FsObjectStore,
        refused: &'static str,
    }

    #[async_trait]
    impl ObjectStore for RefusingStore {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn put(
            &self,
            key: &str,
            content_type: Option<&str>,
            body: UploadStream<'_>,
        ) -> ObjectStoreResult<u64> {
            self.inner.put(key, content_type, body).await
        }

        async fn get(&self, key: &str) -> ObjectStoreResult<DownloadStream> {
            self.inner.get(key).await
        }

        async fn list(&self) -> ObjectStoreResult<Vec<ObjectInfo>> {
            self.inner.list().await
        }

        async fn remove(&self, key: &str) -> ObjectStoreResult<()> {
            if key == self.refused {
                return Err(ObjectStoreError::Backend("permission denied".into()));
            }
            self.inner.remove(key).await
        }

        async fn check(&self) -> ObjectStoreResult<()> {
            self.inner.check().await
        }
    }

    async fn service_over(
        objects: Arc<dyn ObjectStore>,
        with_metadata: bool,
        strategy: DeleteStrategy,
    ) -> FileService {
        let metadata: Option<Arc<dyn MetadataStore>> = if with_metadata {
            let store = SqliteMetadataStore::connect("sqlite::memory:").await.unwrap();
            store.migrate().await.unwrap();
            Some(Arc::new(store))
        } else {
            None
        };
        FileService::new(objects, metadata, strategy)
    }

    async fn service(
        dir: &tempfile::TempDir,
        with_metadata: bool,
        strategy: DeleteStrategy,
    ) -> FileService {
        let objects = Arc::new(FsObjectStore::new(dir.path(), "files").unwrap());
        service_over(objects, with_metadata, strategy).await
    }

    async fn refusing_service(
        dir: &tempfile::TempDir,
        refused: &'static str,
        with_metadata: bool,
        strategy: DeleteStrategy,
    ) -> FileService {
        let objects = Arc::new(RefusingStore {
            inner: FsObjectStore::new(dir.path(), "files").unwrap(),
            refused,
        });
        service_over(objects, with_metadata, strategy).await
    }

    fn keys(files: &[StoredFile]) -> Vec<&str> {
        let mut keys: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn upload_records_metadata_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, true, DeleteStrategy::Batch).await;

        let outcome = svc.upload("a.txt", Some("text/plain"), body(b"abc")).await.unwrap();
        assert_eq!(outcome.size, 3);
        assert!(outcome.record_id.is_some());

        let listed = svc.list_files().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 3);
        assert!(listed[0].upload_date.is_some());

        let chunks: Vec<Bytes> = svc.download("a.txt").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"abc");
    }

    #[tokio::test]
    async fn failed_blob_write_writes_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, true, DeleteStrategy::Batch).await;
        assert!(svc.upload("../evil", None, body(b"x")).await.is_err());
        assert!(svc.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_with_metadata_keeps_rows_when_blob_removal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let svc = refusing_service(&dir, "b.txt", true, DeleteStrategy::Batch).await;
        svc.upload("a.txt", None, body(b"1")).await.unwrap();
        svc.upload("b.txt", None, body(b"2")).await.unwrap();

        let report = svc.delete(vec!["a.txt".into(), "b.txt".into()]).await;
        assert_eq!(report.removed, vec!["a.txt".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "b.txt");
        assert_eq!(keys(&svc.list_files().await.unwrap()), vec!["b.txt"]);
        let chunks: Vec<Bytes> = svc.download("b.txt").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"2");
    }

    #[tokio::test]
    async fn delete_with_metadata_clears_rows_whose_blob_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, true, DeleteStrategy::Batch).await;
        svc.upload("a.txt", None, body(b"1")).await.unwrap();
        svc.upload("b.txt", None, body(b"2")).await.unwrap();
        svc.objects().remove("b.txt").await.unwrap();

        let report = svc
            .delete(vec!["b.txt".into(), "ghost".into()])
            .await;
        assert_eq!(report.removed, vec!["b.txt".to_string(), "ghost".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(keys(&svc.list_files().await.unwrap()), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn object_only_listing_and_batch_delete() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false, DeleteStrategy::Batch).await;
        for name in ["a", "b", "c"] {
            svc.upload(name, None, body(b"data")).await.unwrap();
        }
        let listed = svc.list_files().await.unwrap();
        assert_eq!(keys(&listed), vec!["a", "b", "c"]);
        assert!(listed.iter().all(|f| f.id.is_none() && f.upload_date.is_none()));

        let report = svc.delete(vec!["a".into(), "missing".into(), "c".into()]).await;
        assert_eq!(
            report.removed,
            vec!["a".to_string(), "missing".to_string(), "c".to_string()]
        );
        assert!(report.failed.is_empty());
        assert_eq!(keys(&svc.list_files().await.unwrap()), vec!["b"]);
    }

    #[tokio::test]
    async fn batch_delete_reports_refused_keys() {
        let dir = tempfile::tempdir().unwrap();
        let svc = refusing_service(&dir, "b", false, DeleteStrategy::Batch).await;
        for name in ["a", "b"] {
            svc.upload(name, None, body(b"data")).await.unwrap();
        }
        let report = svc.delete(vec!["a".into(), "b".into()]).await;
        assert_eq!(report.removed, vec!["a".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "b");
        assert_eq!(keys(&svc.list_files().await.unwrap()), vec!["b"]);
    }

    #[tokio::test]
    async fn batch_delete_handles_more_keys_than_queue_depth() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false, DeleteStrategy::Batch).await;
        let names: Vec<String> = (0..BATCH_QUEUE_DEPTH * 2).map(|i| format!("f{i}")).collect();
        for name in &names {
            svc.upload(name, None, body(b"x")).await.unwrap();
        }
        let report = svc.delete(names).await;
        assert_eq!(report.removed.len(), BATCH_QUEUE_DEPTH * 2);
        assert!(svc.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sequential_delete_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let svc = refusing_service(&dir, "keep", false, DeleteStrategy::Sequential).await;
        svc.upload("keep", None, body(b"1")).await.unwrap();
        svc.upload("drop", None, body(b"2")).await.unwrap();

        let report = svc.delete(vec!["keep".into(), "drop".into()]).await;
        assert_eq!(report.removed, vec!["drop".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(keys(&svc.list_files().await.unwrap()), vec!["keep"]);
    }

    #[tokio::test]
    async fn empty_delete_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false, DeleteStrategy::Batch).await;
        let report = svc.delete(Vec::new()).await;
        assert!(report.removed.is_empty() && report.failed.is_empty());
    }
}
