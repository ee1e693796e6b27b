//! Represents a file as shown in the listing.

use super::file_record::FileRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A blob enumerated directly from the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
}

/// A listing entry, regardless of which store produced it.
///
/// Entries enumerated from the object store only carry `key` and `size`;
/// entries read from the metadata table also carry `id` and `upload_date`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct StoredFile {
    pub id: Option<i64>,
    pub filename: String,
    pub key: String,
    pub size: i64,
    pub upload_date: Option<DateTime<Utc>>,
}

impl From<ObjectInfo> for StoredFile {
    fn from(info: ObjectInfo) -> Self {
        Self {
            id: None,
            filename: info.key.clone(),
            key: info.key,
            size: info.size.max(0),
            upload_date: None,
        }
    }
}

impl From<FileRecord> for StoredFile {
    fn from(row: FileRecord) -> Self {
        Self {
            id: Some(row.id),
            filename: row.filename,
            key: row.s3_key,
            size: row.filesize.max(0),
            upload_date: Some(row.upload_date),
        }
    }
}
