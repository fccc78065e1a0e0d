use anyhow::Result;
use axum::Router;
use config::{AppConfig, ChunkBackendKind, RunMode};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{io::ErrorKind, path::Path, sync::Arc};
use storage::{
    ChunkStorage, chunk_fs::FileSystemChunkStorage, chunk_memory::MemoryChunkStorage,
    persistent_fs::FileSystemPersistentStorage,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod storage;

const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting resumable-upload with config: {:?}", cfg);

    // --- Chunk storage ---
    let chunks: Arc<dyn ChunkStorage> = match cfg.chunk_backend {
        ChunkBackendKind::Filesystem => {
            let storage = FileSystemChunkStorage::new(&cfg.chunk_dir).await?;
            tracing::info!("Chunk storage at {}", storage.root().display());
            Arc::new(storage)
        }
        ChunkBackendKind::Memory => {
            tracing::warn!("In-memory chunk storage: in-flight uploads are lost on restart");
            Arc::new(MemoryChunkStorage::new())
        }
    };

    if mode == RunMode::Sweep {
        let max_age = chrono::Duration::seconds(i64::try_from(cfg.chunk_ttl_secs)?);
        let removed = services::janitor::sweep_stale_chunks(chunks.as_ref(), max_age).await?;
        tracing::info!("Sweep complete, {} chunks removed.", removed);
        return Ok(());
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Create parent directory of the database file if needed
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options = db_url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true);
    let db: Arc<SqlitePool> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    // --- Schema (idempotent) ---
    run_migrations(&db).await?;
    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let persistent = FileSystemPersistentStorage::new(db.clone(), &cfg.storage_dir).await?;
    tracing::info!("Persistent storage at {}", cfg.storage_dir);
    let uploads = services::upload_service::UploadService::new(
        chunks,
        Arc::new(persistent),
        cfg.destinations.clone(),
    );

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_chunk_bytes).with_state(uploads);

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

/// Apply the embedded schema, statement by statement.
pub(crate) async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
