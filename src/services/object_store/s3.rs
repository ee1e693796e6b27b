//! S3-compatible object store.
//!
//! Talks to MinIO, AWS S3 or any other S3-compatible endpoint using path-style
//! addressing and static credentials. The SDK's retry policy is disabled:
//! every request is attempted exactly once and failures surface to the caller.

use super::{
    DownloadStream, ObjectStore, ObjectStoreError, ObjectStoreResult, RemoveFailure, UploadStream,
};
use crate::models::stored_file::ObjectInfo;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::{Delete, ObjectIdentifier},
};
use futures::{StreamExt, TryStreamExt, stream};
use std::io;
use tokio::sync::mpsc;
use tracing::debug;

/// S3 caps `DeleteObjects` at 1000 keys per request.
const MAX_KEYS_PER_DELETE: usize = 1000;

/// Connection settings for an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Host[:port] or full URL. A bare host gets `http://` or `https://`
    /// depending on `use_ssl`.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub region: String,
    pub bucket: String,
}

impl S3Settings {
    /// Endpoint as a URL the SDK accepts.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint)
        }
    }
}

/// Object store backed by a single S3 bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "file-manager-env",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
            .retry_config(RetryConfig::disabled())
            // MinIO and most S3-compatible services expect path-style URLs.
            .force_path_style(true)
            .endpoint_url(settings.endpoint_url())
            .build();
        Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    /// Issue one `DeleteObjects` request for `keys`.
    async fn delete_batch(&self, keys: Vec<String>, failures: &mut Vec<RemoveFailure>) {
        let identifiers: Result<Vec<ObjectIdentifier>, _> = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect();
        let request = identifiers.and_then(|objects| {
            Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
        });
        let delete = match request {
            Ok(delete) => delete,
            Err(err) => {
                let message = err.to_string();
                failures.extend(keys.into_iter().map(|key| RemoveFailure {
                    key,
                    error: ObjectStoreError::Backend(message.clone()),
                }));
                return;
            }
        };

        match self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
        {
            Ok(output) => {
                for error in output.errors() {
                    failures.push(RemoveFailure {
                        key: error.key().unwrap_or_default().to_string(),
                        error: ObjectStoreError::Backend(format!(
                            "{}: {}",
                            error.code().unwrap_or("Unknown"),
                            error.message().unwrap_or("no message")
                        )),
                    });
                }
            }
            Err(err) => {
                let message = sdk_message(&err);
                failures.extend(keys.into_iter().map(|key| RemoveFailure {
                    key,
                    error: ObjectStoreError::Backend(message.clone()),
                }));
            }
        }
    }
}

fn sdk_message<E, R>(err: &SdkError<E, R>) -> String
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    DisplayErrorContext(err).to_string()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    /// `PutObject` needs a known length, so the upload is collected in memory
    /// before it is sent.
    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        body: UploadStream<'_>,
    ) -> ObjectStoreResult<u64> {
        let chunks: Vec<bytes::Bytes> = body.try_collect().await?;
        let data = chunks.concat();
        let size = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .content_length(size as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| ObjectStoreError::Backend(sdk_message(&err)))?;
        debug!(key, size, bucket = %self.bucket, "uploaded object");
        Ok(size)
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<DownloadStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(service) if service.is_no_such_key() => {
                    ObjectStoreError::NotFound(key.to_string())
                }
                _ => ObjectStoreError::Backend(sdk_message(&err)),
            })?;
        let chunks = stream::unfold(output.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(io::Error::other), body))
        });
        Ok(chunks.boxed())
    }

    async fn list(&self) -> ObjectStoreResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|err| ObjectStoreError::Backend(sdk_message(&err)))?;

            objects.extend(page.contents().iter().filter_map(|obj| {
                obj.key().map(|key| ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                })
            }));

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(objects)
    }

    async fn remove(&self, key: &str) -> ObjectStoreResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| ObjectStoreError::Backend(sdk_message(&err)))?;
        debug!(key, bucket = %self.bucket, "removed object");
        Ok(())
    }

    /// Drain `keys` into `DeleteObjects` requests of up to 1000 keys each.
    async fn remove_many(&self, mut keys: mpsc::Receiver<String>) -> Vec<RemoveFailure> {
        let mut failures = Vec::new();
        let mut batch = Vec::with_capacity(MAX_KEYS_PER_DELETE);
        while let Some(key) = keys.recv().await {
            batch.push(key);
            if batch.len() == MAX_KEYS_PER_DELETE {
                self.delete_batch(std::mem::take(&mut batch), &mut failures)
                    .await;
            }
        }
        if !batch.is_empty() {
            self.delete_batch(batch, &mut failures).await;
        }
        failures
    }

    async fn check(&self) -> ObjectStoreResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| ObjectStoreError::Backend(sdk_message(&err)))?;
        Ok(())
    }
}
