//! PostgreSQL-backed metadata store.

use super::{MetadataResult, MetadataStore, run_migration};
use crate::models::file_record::{FileRecord, NewFileRecord};
use async_trait::async_trait;
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
};

const MIGRATION: &str = include_str!("../../../migrations/postgres/0001_files.sql");

/// Connection settings, one field per `DB_*` variable.
#[derive(Clone, Debug)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl PostgresSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(PgSslMode::Disable)
    }
}

#[derive(Clone, Debug)]
pub struct PostgresMetadataStore {
    pool: PgPool,
}

impl PostgresMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &PostgresSettings) -> MetadataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(settings.connect_options())
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    fn name(&self) -> &str {
        "postgres"
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
             VALUES ($1, $2, $3, $4)
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
        let result = sqlx::query("DELETE FROM files WHERE s3_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
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
