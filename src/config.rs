use crate::services::{metadata_store::PostgresSettings, object_store::S3Settings};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BUCKET: &str = "files";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PG_PORT: u16 = 5432;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// How object-store-only deployments remove several files at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeleteStrategy {
    /// One remove call per key, in order.
    Sequential,
    /// All keys fed through a queue into the store's batch remove.
    #[default]
    Batch,
}

/// Where blobs are stored.
#[derive(Debug, Clone)]
pub enum ObjectBackend {
    S3(S3Settings),
    Local { root: String, bucket: String },
}

/// Where file metadata is recorded, if anywhere.
#[derive(Debug, Clone)]
pub enum MetadataBackend {
    Postgres(PostgresSettings),
    Sqlite { url: String },
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub objects: ObjectBackend,
    pub metadata: Option<MetadataBackend>,
    pub delete_strategy: DeleteStrategy,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Browser-based file manager over S3-compatible storage")]
pub struct Args {
    /// Host to bind to (overrides FILE_MANAGER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_MANAGER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for blobs when no S3 endpoint is set (overrides FILE_MANAGER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// SQLite URL for file metadata (overrides FILE_MANAGER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bulk delete strategy without a metadata store (overrides FILE_MANAGER_DELETE_MODE)
    #[arg(long, value_enum)]
    pub delete_mode: Option<DeleteStrategy>,

    /// Largest accepted upload body (overrides FILE_MANAGER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up with `var`.
    ///
    /// Empty variables count as unset.
    pub fn from_sources<F>(args: Args, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|value| !value.trim().is_empty());

        // --- Listener ---
        let host = args
            .host
            .or_else(|| var("FILE_MANAGER_HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "FILE_MANAGER_PORT")?.unwrap_or(DEFAULT_PORT),
        };

        // --- Object store ---
        let bucket = var("S3_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into());
        let objects = match var("S3_ENDPOINT") {
            Some(endpoint) => ObjectBackend::S3(S3Settings {
                endpoint,
                access_key: var("S3_ACCESS_KEY").unwrap_or_default(),
                secret_key: var("S3_SECRET_KEY").unwrap_or_default(),
                use_ssl: var("S3_USE_SSL").as_deref() == Some("true"),
                region: var("S3_REGION").unwrap_or_else(|| DEFAULT_REGION.into()),
                bucket,
            }),
            None => ObjectBackend::Local {
                root: args
                    .storage_dir
                    .or_else(|| var("FILE_MANAGER_STORAGE_DIR"))
                    .unwrap_or_else(|| "./data/objects".into()),
                bucket,
            },
        };

        // --- Metadata store ---
        let metadata = match var("DB_HOST") {
            Some(host) => Some(MetadataBackend::Postgres(PostgresSettings {
                host,
                port: parse_var(&var, "DB_PORT")?.unwrap_or(DEFAULT_PG_PORT),
                user: var("DB_USER").unwrap_or_default(),
                password: var("DB_PASSWORD").unwrap_or_default(),
                database: var("DB_NAME").unwrap_or_default(),
            })),
            None => args
                .database_url
                .or_else(|| var("FILE_MANAGER_DATABASE_URL"))
                .map(|url| MetadataBackend::Sqlite { url }),
        };

        // --- Behaviour ---
        let delete_strategy = match args.delete_mode {
            Some(mode) => mode,
            None => match var("FILE_MANAGER_DELETE_MODE") {
                Some(value) => <DeleteStrategy as ValueEnum>::from_str(&value, true)
                    .map_err(|err| anyhow::anyhow!(err))
                    .with_context(|| {
                        format!("parsing FILE_MANAGER_DELETE_MODE value `{}`", value)
                    })?,
                None => DeleteStrategy::default(),
            },
        };
        let max_upload_bytes = match args.max_upload_bytes {
            Some(limit) => limit,
            None => parse_var(&var, "FILE_MANAGER_MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };

        Ok(Self {
            host,
            port,
            objects,
            metadata,
            delete_strategy,
            max_upload_bytes,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Look up `name` and parse it, naming the variable on failure.
fn parse_var<T, F>(var: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}
