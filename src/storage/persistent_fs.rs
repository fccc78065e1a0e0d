//! Persistent storage on local disk with SQLite metadata.
//!
//! Payloads live at `base_path/{name}`; each collected file also gets a
//! `stored_files` row carrying its size and MD5 etag.

use super::{ByteStream, PersistentStorage, StorageError, StorageResult};
use crate::models::stored_file::StoredFile;
use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 1024;
/// Attempts at finding a free alternative name before giving up.
const MAX_NAME_ATTEMPTS: usize = 100;
const RANDOM_SUFFIX_LEN: usize = 7;

#[derive(Clone)]
pub struct FileSystemPersistentStorage {
    /// Shared SQLite connection pool used for metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where assembled files are stored.
    pub base_path: PathBuf,
}

impl FileSystemPersistentStorage {
    pub async fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { db, base_path })
    }

    /// Basic name validation to avoid trivial path traversal vectors.
    ///
    /// Rejects names that begin with `/`, have empty, `.` or `..` segments,
    /// or carry control characters. Dots inside a segment are fine.
    fn ensure_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = || StorageError::InvalidKey(name.to_string());
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(invalid());
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(invalid());
        }
        if name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(invalid());
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    fn file_path(&self, name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.extend(name.split('/'));
        path
    }

    async fn is_taken(&self, name: &str) -> StorageResult<bool> {
        if fs::try_exists(self.file_path(name)).await? {
            return Ok(true);
        }
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM stored_files WHERE name = ?")
            .bind(name)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row.is_some())
    }

    /// Reserve `name` on disk with an exclusive create, falling back to
    /// random-suffixed alternatives while the name is taken.
    async fn reserve(&self, name: &str) -> StorageResult<(String, PathBuf)> {
        let mut candidate = name.to_string();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self.file_path(&candidate);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok((candidate, path)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already taken, picking another name", candidate);
                    candidate = alternative_name(name);
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
        Err(StorageError::NameExhausted(name.to_string()))
    }

    /// Drain `stream` into `tmp_path`, returning size and MD5 hex digest.
    async fn write_payload(tmp_path: &Path, mut stream: ByteStream) -> StorageResult<(i64, String)> {
        let mut file = File::create(tmp_path).await?;
        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    async fn fetch_stored(&self, name: &str) -> StorageResult<StoredFile> {
        sqlx::query_as::<_, StoredFile>(
            "SELECT id, name, size_bytes, etag, created_at FROM stored_files WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NotFound(name.to_string()),
            other => StorageError::Sqlx(other),
        })
    }
}

#[async_trait]
impl PersistentStorage for FileSystemPersistentStorage {
    async fn generate_unique_name(&self, proposed: &str) -> StorageResult<String> {
        self.ensure_name_safe(proposed)?;
        if !self.is_taken(proposed).await? {
            return Ok(proposed.to_string());
        }
        for _ in 0..MAX_NAME_ATTEMPTS {
            let candidate = alternative_name(proposed);
            if !self.is_taken(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(StorageError::NameExhausted(proposed.to_string()))
    }

    /// Stream-write a new file and record its metadata.
    ///
    /// - Reserves the final path exclusively, so an existing file is never
    ///   overwritten.
    /// - Writes bytes into a temp file while computing size and MD5.
    /// - fsyncs, then renames over the reservation.
    ///
    /// On any error both the temp file and the reservation are removed.
    async fn save_stream(&self, name: &str, stream: ByteStream) -> StorageResult<StoredFile> {
        self.ensure_name_safe(name)?;
        let (name, file_path) = self.reserve(name).await?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_path.clone());
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size_bytes, etag) = match Self::write_payload(&tmp_path, stream).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                let _ = fs::remove_file(&file_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            let _ = fs::remove_file(&file_path).await;
            return Err(StorageError::Io(err));
        }

        let insert_result = sqlx::query_as::<_, StoredFile>(
            r#"
            INSERT INTO stored_files (id, name, size_bytes, etag, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, name, size_bytes, etag, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&name)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(stored) => {
                info!("stored {} ({} bytes, etag {})", stored.name, size_bytes, etag);
                Ok(stored)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    async fn open(&self, name: &str) -> StorageResult<(StoredFile, ByteStream)> {
        self.ensure_name_safe(name)?;
        let stored = self.fetch_stored(name).await?;
        let file = File::open(self.file_path(name)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(name.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((stored, Box::pin(ReaderStream::new(file).map_err(StorageError::Io))))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem+sqlite"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&*self.db).await?;
        if one != 1 {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "unexpected probe result: {}",
                one
            ))));
        }
        if !fs::try_exists(&self.base_path).await? {
            return Err(StorageError::NotFound(self.base_path.display().to_string()));
        }
        Ok(())
    }
}

/// Insert `_` plus a short random token before the extension of the last
/// path segment: `a/b/report.tar.gz` -> `a/b/report_x1y2z3w.tar.gz`.
fn alternative_name(name: &str) -> String {
    let (dir, file) = match name.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, name),
    };
    let (stem, ext) = match file.find('.') {
        Some(0) | None => (file, ""),
        Some(pos) => file.split_at(pos),
    };
    let token: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RANDOM_SUFFIX_LEN)
        .collect();
    let renamed = format!("{}_{}{}", stem, token, ext);
    match dir {
        Some(dir) => format!("{}/{}", dir, renamed),
        None => renamed,
    }
}
