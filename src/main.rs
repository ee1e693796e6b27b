use anyhow::{Context, Result};
use axum::Router;
use file_manager::{
    config::{AppConfig, MetadataBackend, ObjectBackend},
    routes,
    services::{
        file_service::FileService,
        metadata_store::{MetadataStore, PostgresMetadataStore, SqliteMetadataStore},
        object_store::{FsObjectStore, ObjectStore, S3ObjectStore},
        page_renderer::PageRenderer,
    },
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting file-manager on {}", cfg.addr());

    // --- Initialize metadata store ---
    let metadata = connect_metadata(cfg.metadata.as_ref()).await?;

    // --- Handle migration mode ---
    if migrate {
        let Some(metadata) = metadata else {
            anyhow::bail!("--migrate needs DB_HOST or a SQLite database URL");
        };
        metadata
            .migrate()
            .await
            .context("running metadata migrations")?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let objects = build_object_store(&cfg.objects)?;
    let files = FileService::new(objects, metadata, cfg.delete_strategy);
    let pages = PageRenderer::new().context("compiling page template")?;

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes)
        .with_state(AppState::new(files, pages));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the configured object store.
fn build_object_store(backend: &ObjectBackend) -> Result<Arc<dyn ObjectStore>> {
    match backend {
        ObjectBackend::S3(settings) => {
            tracing::info!(
                "Using S3 bucket `{}` at {}",
                settings.bucket,
                settings.endpoint_url()
            );
            Ok(Arc::new(S3ObjectStore::new(settings)))
        }
        ObjectBackend::Local { root, bucket } => {
            if !Path::new(root).exists() {
                fs::create_dir_all(root)?;
                tracing::info!("Created storage directory at {}", root);
            }
            tracing::info!("Using local bucket `{}` under {}", bucket, root);
            Ok(Arc::new(FsObjectStore::new(root, bucket)?))
        }
    }
}

/// Connect to the configured metadata database, if any.
async fn connect_metadata(
    backend: Option<&MetadataBackend>,
) -> Result<Option<Arc<dyn MetadataStore>>> {
    let store: Arc<dyn MetadataStore> = match backend {
        None => {
            tracing::info!("No metadata database configured; listing straight from the bucket");
            return Ok(None);
        }
        Some(MetadataBackend::Postgres(settings)) => {
            tracing::info!(
                "Connecting to PostgreSQL {}:{}/{}",
                settings.host,
                settings.port,
                settings.database
            );
            let store = PostgresMetadataStore::connect(settings)
                .await
                .context("connecting to PostgreSQL")?;
            Arc::new(store)
        }
        Some(MetadataBackend::Sqlite { url }) => {
            tracing::info!("Opening SQLite metadata database {}", url);
            let store = SqliteMetadataStore::connect(url)
                .await
                .context("opening SQLite database")?;
            Arc::new(store)
        }
    };
    Ok(Some(store))
}
