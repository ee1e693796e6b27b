//! Local-disk object store.
//!
//! Blobs live beneath `root/{bucket}/{shard}/{shard}/{key}`, where the two
//! shard directories are the first two bytes of `MD5(bucket/key)` in hex. This
//! keeps the number of entries per directory small. Writes go to a temporary
//! file in the target directory, are fsynced and then renamed into place, so a
//! reader never sees a half-written blob.

use super::{DownloadStream, ObjectStore, ObjectStoreError, ObjectStoreResult, UploadStream};
use crate::models::stored_file::ObjectInfo;
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const TMP_PREFIX: &str = ".tmp-";
const CHECK_PREFIX: &str = ".readyz-";

/// Object store backed by a directory on local disk.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    /// Base directory; each bucket is a subdirectory.
    base_path: PathBuf,
    bucket: String,
}

impl FsObjectStore {
    /// Create a store rooted at `base_path`, holding blobs of `bucket`.
    ///
    /// The bucket directory is created lazily on first write.
    pub fn new(
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
    ) -> ObjectStoreResult<Self> {
        let bucket = bucket.into();
        if bucket.is_empty()
            || bucket.contains('/')
            || bucket.contains('\\')
            || bucket.starts_with('.')
        {
            return Err(ObjectStoreError::Backend(format!(
                "bucket `{}` is not a valid directory name",
                bucket
            )));
        }
        Ok(Self {
            base_path: base_path.into(),
            bucket,
        })
    }

    /// Reject keys that could escape the bucket directory.
    ///
    /// Empty keys, absolute keys, `.` or `..` segments, backslashes and control
    /// bytes are all refused. Dots inside a name (`report..v2.txt`) are fine.
    fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
        let invalid = || ObjectStoreError::InvalidKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.ends_with('/') {
            return Err(invalid());
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(invalid());
        }
        for segment in key.split('/') {
            if segment.is_empty() || segment.starts_with(TMP_PREFIX) {
                return Err(invalid());
            }
            // Anything but a plain name would let the joined path climb out.
            let mut components = Path::new(segment).components();
            if !matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            ) {
                return Err(invalid());
            }
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard directories for a key, as lowercase hex (00–ff).
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Rebuild the key for a blob path found while walking the bucket.
    ///
    /// Returns `None` for anything that is not a blob this store wrote:
    /// temp files, probe files, or files whose shards don't match their key.
    fn key_for_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.bucket_root()).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        if parts.len() < 3 {
            return None;
        }
        let file_name = parts.last()?;
        if file_name.starts_with(TMP_PREFIX) || file_name.starts_with(CHECK_PREFIX) {
            return None;
        }
        let key = parts[2..].join("/");
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, &key);
        (parts[0] == shard_a && parts[1] == shard_b).then_some(key)
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        content_type: Option<&str>,
        mut body: UploadStream<'_>,
    ) -> ObjectStoreResult<u64> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ObjectStoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }

        debug!(
            key,
            size_bytes,
            content_type = content_type.unwrap_or("-"),
            "stored {}",
            file_path.display()
        );
        Ok(size_bytes)
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<DownloadStream> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn list(&self) -> ObjectStoreResult<Vec<ObjectInfo>> {
        let root = self.bucket_root();
        let mut objects = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // A bucket nobody has written to yet is simply empty.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(ObjectStoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Some(key) = self.key_for_path(&path) {
                        let size = entry.metadata().await?.len() as i64;
                        objects.push(ObjectInfo { key, size });
                    }
                }
            }
        }
        Ok(objects)
    }

    /// Removing a key that has no blob succeeds, as `DeleteObject` does on S3.
    async fn remove(&self, key: &str) -> ObjectStoreResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(key, "nothing stored under key, treating remove as done");
                return Ok(());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root()).await;
        }
        Ok(())
    }

    /// Write, read back and delete a probe file under the bucket root.
    async fn check(&self) -> ObjectStoreResult<()> {
        let root = self.bucket_root();
        fs::create_dir_all(&root).await?;
        let probe = root.join(format!("{}{}", CHECK_PREFIX, Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(ObjectStoreError::Backend("probe file content mismatch".into()));
        }
        Ok(())
    }
}
