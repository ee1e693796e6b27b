//! SQLite-backed metadata store.

use super::{MetadataResult, MetadataStore, run_migration};
use crate::models::file_record::{FileRecord, NewFileRecord};
use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};
use tracing::{debug, info};

const MIGRATION: &str = include_str!("../../../migrations/sqlite/0001_files.sql");

#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url`.
    ///
    /// For file-backed URLs the parent directory is created first, since
    /// SQLite will not create it.
    pub async fn connect(url: &str) -> MetadataResult<Self> {
        debug!("Connecting using raw URL => {}", url);
        let db_path = url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        let in_memory = db_path.starts_with(":memory:") || url.contains("mode=memory");
        if !in_memory {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                    info!("Created missing directory {:?}", parent);
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if in_memory {
            // Every connection to `:memory:` is its own database; pin to one.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list(&self) -> MetadataResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(
            "SELECT id, filename, s3_key, filesize, upload_date
             FROM files
             ORDER BY upload_date DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert(&self, record: &NewFileRecord<'_>) -> MetadataResult<FileRecord> {
        let row = sqlx::query_as::<_, FileRecord>(
            "INSERT INTO files (filename, s3_key, filesize, upload_date)
             VALUES (?, ?, ?, ?)
             RETURNING id, filename, s3_key, filesize, upload_date",
        )
        .bind(record.filename)
        .bind(record.s3_key)
        .bind(record.filesize)
        .bind(record.upload_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_by_key(&self, key: &str) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM files WHERE s3_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> MetadataResult<()> {
        let pool = &self.pool;
        run_migration(self.name(), MIGRATION, |stmt| async move {
            sqlx::query(stmt).execute(pool).await.map(|_| ())
        })
        .await
    }
}
