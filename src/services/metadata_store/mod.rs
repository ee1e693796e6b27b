//! Metadata store for the `files` table.
//!
//! The table records `(filename, s3_key, filesize, upload_date)` for every
//! successful upload. Two `sqlx` backends share the [`MetadataStore`] trait:
//! PostgreSQL for deployments and SQLite for local runs and tests.

mod postgres;
mod sqlite;

pub use self::postgres::{PostgresMetadataStore, PostgresSettings};
pub use self::sqlite::SqliteMetadataStore;

use crate::models::file_record::{FileRecord, NewFileRecord};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Access to the `files` table.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Backend name, used for logging.
    fn name(&self) -> &str;

    /// All rows, most recent upload first.
    async fn list(&self) -> MetadataResult<Vec<FileRecord>>;

    /// Insert a row and return it with its assigned id.
    async fn insert(&self, record: &NewFileRecord<'_>) -> MetadataResult<FileRecord>;

    /// Delete every row whose `s3_key` equals `key`; returns the rows removed.
    async fn delete_by_key(&self, key: &str) -> MetadataResult<u64>;

    /// `SELECT 1` round trip used by `/readyz`.
    async fn ping(&self) -> MetadataResult<()>;

    /// Create the `files` table if it doesn't exist.
    async fn migrate(&self) -> MetadataResult<()>;
}

/// Split an embedded migration script into individual statements.
fn migration_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Run each statement of `sql` through `execute`, logging as it goes.
async fn run_migration<'a, F, Fut>(
    backend: &str,
    sql: &'a str,
    mut execute: F,
) -> MetadataResult<()>
where
    F: FnMut(&'a str) -> Fut,
    Fut: Future<Output = Result<(), sqlx::Error>>,
{
    let statements = migration_statements(sql);
    info!("Running {} {} migration statements...", statements.len(), backend);
    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        execute(stmt).await?;
    }
    Ok(())
}
