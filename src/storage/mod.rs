//! Storage collaborators of the resumable upload coordinator.
//!
//! Two capability sets are modelled as traits so deployments can pick a
//! backend at startup:
//! - [`ChunkStorage`] holds the transient, individually addressable chunks.
//! - [`PersistentStorage`] holds assembled files for the long term.

pub mod chunk_fs;
pub mod chunk_memory;
pub mod persistent_fs;

use crate::models::stored_file::StoredFile;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("invalid key `{0}`")]
    InvalidKey(String),
    #[error("could not find a free name for `{0}`")]
    NameExhausted(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value blob store for in-flight chunks.
///
/// Implementations must tolerate concurrent writers: chunks of one upload
/// can arrive in parallel from several connections.
#[async_trait]
pub trait ChunkStorage: Send + Sync + 'static {
    /// Check if a chunk exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Store a chunk, replacing any previous content under `key`.
    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Open a chunk for reading.
    async fn open(&self, key: &str) -> StorageResult<ByteStream>;

    /// Delete a chunk. Missing keys yield `StorageError::NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// List every stored chunk key. Used by janitors to find orphans.
    async fn list_all(&self) -> StorageResult<Vec<String>> {
        self.list("").await
    }

    /// Time of the last write to `key`.
    async fn modified(&self, key: &str) -> StorageResult<DateTime<Utc>>;

    /// Static identifier of the backend type, for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is usable. Called by readiness probes.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Durable store for assembled files.
#[async_trait]
pub trait PersistentStorage: Send + Sync + 'static {
    /// Return `proposed` if it is free, otherwise an altered free name.
    async fn generate_unique_name(&self, proposed: &str) -> StorageResult<String>;

    /// Drain `stream` into a new file. The returned record carries the name
    /// actually used, which differs from `name` if it was taken meanwhile.
    async fn save_stream(&self, name: &str, stream: ByteStream) -> StorageResult<StoredFile>;

    /// Open a stored file for reading.
    async fn open(&self, name: &str) -> StorageResult<(StoredFile, ByteStream)>;

    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::persistent_fs::FileSystemPersistentStorage;
    use futures::TryStreamExt;
    use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
    use std::sync::Arc;
    use tempfile::TempDir;

    use super::ByteStream;

    /// Single-connection in-memory pool with the schema applied.
    pub async fn memory_pool() -> Arc<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        Arc::new(pool)
    }

    pub async fn persistent() -> (TempDir, FileSystemPersistentStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemPersistentStorage::new(memory_pool().await, dir.path())
            .await
            .unwrap();
        (dir, storage)
    }

    pub async fn read_all(stream: ByteStream) -> Vec<u8> {
        let parts: Vec<_> = stream.try_collect().await.unwrap();
        parts.concat()
    }
}
