//! Test helpers for the HTTP integration tests.
//!
//! Builds a fully wired router over a temp-dir object store and an in-memory
//! SQLite metadata store, plus request/response helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use file_manager::{
    config::DeleteStrategy,
    models::stored_file::ObjectInfo,
    routes::routes::routes,
    services::{
        file_service::FileService,
        metadata_store::{MetadataStore, SqliteMetadataStore},
        object_store::{
            DownloadStream, FsObjectStore, ObjectStore, ObjectStoreError, ObjectStoreResult,
            RemoveFailure, UploadStream,
        },
        page_renderer::PageRenderer,
    },
    state::AppState,
};
use http_body_util::BodyExt;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const BOUNDARY: &str = "----file-manager-test-boundary";
pub const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Which stores the app under test is wired with.
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    WithMetadata,
    ObjectsOnly(DeleteStrategy),
}

/// `FsObjectStore` that counts calls per operation and can be told to refuse
/// removing given keys.
pub struct CountingStore {
    inner: FsObjectStore,
    refused: Mutex<Vec<String>>,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub lists: AtomicUsize,
    pub removes: AtomicUsize,
    pub batches: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: FsObjectStore) -> Self {
        Self {
            inner,
            refused: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        }
    }

    /// Make every later removal of `key` fail with a backend error.
    pub fn refuse_removal(&self, key: &str) {
        self.refused
            .lock()
            .expect("refused keys lock")
            .push(key.to_string());
    }

    /// Calls that could change the bucket.
    pub fn mutations(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
            + self.removes.load(Ordering::SeqCst)
            + self.batches.load(Ordering::SeqCst)
    }

    /// Keys currently in the bucket, sorted, bypassing the counters.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .list()
            .await
            .expect("list bucket")
            .into_iter()
            .map(|info| info.key)
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        body: UploadStream<'_>,
    ) -> ObjectStoreResult<u64> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, content_type, body).await
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<DownloadStream> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn list(&self) -> ObjectStoreResult<Vec<ObjectInfo>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list().await
    }

    async fn remove(&self, key: &str) -> ObjectStoreResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refused
            .lock()
            .expect("refused keys lock")
            .iter()
            .any(|refused| refused == key);
        if refused {
            return Err(ObjectStoreError::Backend(format!("removal of `{key}` refused")));
        }
        self.inner.remove(key).await
    }

    async fn remove_many(&self, mut keys: mpsc::Receiver<String>) -> Vec<RemoveFailure> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut failures = Vec::new();
        while let Some(key) = keys.recv().await {
            if let Err(error) = self.remove(&key).await {
                failures.push(RemoveFailure { key, error });
            }
        }
        failures
    }

    async fn check(&self) -> ObjectStoreResult<()> {
        self.inner.check().await
    }
}

pub struct TestApp {
    pub router: Router,
    pub objects: Arc<CountingStore>,
    pub metadata: Option<SqliteMetadataStore>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new(mode: Mode) -> Self {
        Self::build(mode, true, BODY_LIMIT).await
    }

    /// Metadata mode with the `files` table never created.
    pub async fn without_schema() -> Self {
        Self::build(Mode::WithMetadata, false, BODY_LIMIT).await
    }

    /// Metadata mode with request bodies capped at `body_limit` bytes.
    pub async fn with_body_limit(body_limit: usize) -> Self {
        Self::build(Mode::WithMetadata, true, body_limit).await
    }

    async fn build(mode: Mode, migrate: bool, body_limit: usize) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let fs = FsObjectStore::new(dir.path(), "files").expect("create object store");
        let objects = Arc::new(CountingStore::new(fs));

        let (metadata, strategy) = match mode {
            Mode::WithMetadata => {
                let store = SqliteMetadataStore::connect("sqlite::memory:")
                    .await
                    .expect("open in-memory database");
                if migrate {
                    store.migrate().await.expect("create files table");
                }
                (Some(store), DeleteStrategy::default())
            }
            Mode::ObjectsOnly(strategy) => (None, strategy),
        };

        let files = FileService::new(
            objects.clone(),
            metadata
                .clone()
                .map(|store| Arc::new(store) as Arc<dyn MetadataStore>),
            strategy,
        );
        let pages = PageRenderer::new().expect("compile template");
        let router = routes(body_limit).with_state(AppState::new(files, pages));

        Self {
            router,
            objects,
            metadata,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn upload(&self, filename: &str, data: &[u8]) -> Response<Body> {
        let request = MultipartBuilder::new()
            .file("myFile", filename, "application/octet-stream", data)
            .into_request();
        self.send(request).await
    }

    pub async fn download(&self, name: &str) -> Response<Body> {
        let uri = format!("/download?name={}", urlencoding::encode(name));
        self.send(get(&uri)).await
    }

    pub async fn delete(&self, names: &[&str]) -> Response<Body> {
        let form = names
            .iter()
            .map(|name| format!("names={}", urlencoding::encode(name)))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method("POST")
            .uri("/delete")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .expect("build delete request");
        self.send(request).await
    }

    /// Rendered listing page.
    pub async fn index(&self) -> String {
        let response = self.send(get("/")).await;
        assert_eq!(response.status(), 200);
        body_string(response).await
    }

    /// Keys shown in the listing, in page order.
    pub async fn listed_keys(&self) -> Vec<String> {
        let page = self.index().await;
        page.split(r#"name="names" value=""#)
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .map(str::to_string)
            .collect()
    }

    /// Make every later metadata insert fail.
    pub async fn break_metadata_inserts(&self) {
        let store = self.metadata.as_ref().expect("metadata store");
        sqlx::query(
            "CREATE TRIGGER reject_inserts BEFORE INSERT ON files
             BEGIN SELECT RAISE(ABORT, 'metadata unavailable'); END",
        )
        .execute(store.pool())
        .await
        .expect("create trigger");
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build GET request")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

pub async fn body_string(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).expect("utf-8 body")
}

/// Hand-rolled `multipart/form-data` body.
pub struct MultipartBuilder {
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self { body: Vec::new() }
    }

    pub fn file(mut self, field: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; \
                 filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"{field}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn into_request(mut self) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(self.body))
            .expect("build upload request")
    }
}
