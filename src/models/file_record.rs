//! Represents a row of the `files` metadata table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A metadata row describing an uploaded blob.
///
/// The row is independent of the blob's actual existence in the object store;
/// nothing keeps the two in sync beyond call ordering.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Auto-incremented row identifier.
    pub id: i64,

    /// Original filename as submitted by the browser.
    pub filename: String,

    /// Object key the blob was stored under.
    pub s3_key: String,

    /// Size in bytes.
    pub filesize: i64,

    /// When the row was inserted.
    pub upload_date: DateTime<Utc>,
}

/// Values for a metadata row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewFileRecord<'a> {
    pub filename: &'a str,
    pub s3_key: &'a str,
    pub filesize: i64,
    pub upload_date: DateTime<Utc>,
}
