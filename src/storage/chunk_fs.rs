//! Chunk storage in a local scratch directory.
//!
//! One flat file per chunk under `root/{key}`. Writes land in a `.tmp-{uuid}`
//! sibling first and are renamed into place, so readers never see a torn
//! chunk even when the same key is written concurrently.

use super::{ByteStream, ChunkStorage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";
const MAX_KEY_LEN: usize = 255;

#[derive(Clone, Debug)]
pub struct FileSystemChunkStorage {
    root: PathBuf,
}

impl FileSystemChunkStorage {
    /// Open (and create if needed) a scratch directory.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Default scratch location under the system temp directory.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("resumable_upload")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are flat: a single path component without separators or dots
    /// that could escape the root or collide with temp files.
    fn chunk_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.len() > MAX_KEY_LEN
            || key.starts_with('.')
            || key.contains('/')
            || key.contains('\\')
            || key.bytes().any(|b| b.is_ascii_control())
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn not_found(key: &str, err: io::Error) -> StorageError {
        if err.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    async fn write_tmp(tmp_path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = File::create(tmp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

#[async_trait]
impl ChunkStorage for FileSystemChunkStorage {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.chunk_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.chunk_path(key)?;
        let tmp_path = self.root.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

        if let Err(err) = Self::write_tmp(&tmp_path, &data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        debug!("stored chunk {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.chunk_path(key)?;
        let file = File::open(&path)
            .await
            .map_err(|err| Self::not_found(key, err))?;
        Ok(Box::pin(ReaderStream::new(file).map_err(StorageError::Io)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.chunk_path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|err| Self::not_found(key, err))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(StorageError::Io(err)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(TMP_PREFIX) || !name.starts_with(prefix) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                keys.push(name);
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn modified(&self, key: &str) -> StorageResult<DateTime<Utc>> {
        let path = self.chunk_path(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| Self::not_found(key, err))?;
        Ok(meta.modified()?.into())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    /// Write, read back and remove a probe file.
    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.root.join(format!("{}readyz-{}", TMP_PREFIX, Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read? != b"readyz" {
            return Err(StorageError::Io(io::Error::other("probe content mismatch")));
        }
        Ok(())
    }
}
