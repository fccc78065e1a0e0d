//! ResumableFile: chunk bookkeeping and assembly for one upload.
//!
//! Built per request and holds no state of its own: which chunks exist is
//! always read back from chunk storage, so any number of handlers (or
//! processes sharing a chunk backend) can work on the same upload.
//!
//! Two requests may both see a complete upload and both collect it. Each
//! collection gets its own collision-free name, so nothing is overwritten,
//! but the file can be stored twice. Callers needing exactly one collection
//! must serialize `collect` per identity themselves.

use super::{UploadError, UploadResult};
use crate::{
    models::{
        destination::Destination,
        stored_file::StoredFile,
        upload::{UploadIdentity, UploadParams},
    },
    storage::{ByteStream, ChunkStorage, PersistentStorage, StorageError},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use std::{collections::BTreeSet, fmt::Write as _, sync::Arc};
use tracing::{debug, info, instrument, warn};

pub struct ResumableFile {
    identity: UploadIdentity,
    params: UploadParams,
    destination: Destination,
    chunks: Arc<dyn ChunkStorage>,
    persistent: Arc<dyn PersistentStorage>,
}

impl ResumableFile {
    pub fn new(
        destination: Destination,
        user: &str,
        field: &str,
        params: UploadParams,
        chunks: Arc<dyn ChunkStorage>,
        persistent: Arc<dyn PersistentStorage>,
    ) -> UploadResult<Self> {
        params.validate()?;
        Ok(Self {
            identity: UploadIdentity::derive(user, field, &params),
            params,
            destination,
            chunks,
            persistent,
        })
    }

    pub fn current_chunk_key(&self) -> String {
        self.identity.chunk_key(self.params.chunk_number)
    }

    /// Whether the chunk carried by this request is already stored.
    pub async fn chunk_exists(&self) -> UploadResult<bool> {
        Ok(self.chunks.exists(&self.current_chunk_key()).await?)
    }

    /// Store this request's chunk, replacing a previous copy.
    #[instrument(skip(self, data), fields(identity = %self.identity, chunk = self.params.chunk_number, len = data.len()))]
    pub async fn process_chunk(&self, data: Bytes) -> UploadResult<()> {
        let key = self.current_chunk_key();
        self.chunks
            .save(&key, data)
            .await
            .map_err(|source| UploadError::StorageWrite {
                target: key.clone(),
                source,
            })?;
        debug!("chunk {} stored", key);
        Ok(())
    }

    /// Indices in `1..=total_chunks` currently present in chunk storage.
    pub async fn present_chunks(&self) -> UploadResult<BTreeSet<u32>> {
        let keys = self.chunks.list(&self.identity.chunk_prefix()).await?;
        Ok(keys
            .iter()
            .filter_map(|key| self.identity.parse_chunk_index(key))
            .filter(|n| (1..=self.params.total_chunks).contains(n))
            .collect())
    }

    pub async fn is_complete(&self) -> UploadResult<bool> {
        let present = self.present_chunks().await?;
        Ok(present.len() == self.params.total_chunks as usize)
    }

    /// Assemble all chunks into persistent storage and purge them.
    ///
    /// Fails with `Precondition` while chunks are missing (nothing is
    /// written) and with `NotFound` once the chunks are gone. An upload that
    /// never stored a chunk also yields `NotFound`, indistinguishable from
    /// one already collected.
    #[instrument(skip(self), fields(identity = %self.identity, total = self.params.total_chunks))]
    pub async fn collect(&self) -> UploadResult<StoredFile> {
        let present = self.present_chunks().await?;
        if present.is_empty() {
            return Err(UploadError::NotFound(self.identity.to_string()));
        }
        let total = self.params.total_chunks;
        if present.len() != total as usize {
            return Err(UploadError::Precondition {
                identity: self.identity.to_string(),
                present: present.len(),
                total,
            });
        }

        let proposed = self.storage_filename()?;
        let name = self.persistent.generate_unique_name(&proposed).await?;
        let stored = self
            .persistent
            .save_stream(&name, self.ordered_chunks())
            .await
            .map_err(|source| match source {
                // a concurrent collector purged the chunks mid-read
                StorageError::NotFound(_) => UploadError::NotFound(self.identity.to_string()),
                source => UploadError::StorageWrite {
                    target: name.clone(),
                    source,
                },
            })?;

        self.delete_chunks().await;
        info!(
            "collected {} chunks of {} into {}",
            total, self.params.filename, stored.name
        );
        Ok(stored)
    }

    /// Chunks 1..=N concatenated strictly by index. Each chunk is opened only
    /// when the previous one is drained, so at most one reader is live.
    fn ordered_chunks(&self) -> ByteStream {
        let chunks = self.chunks.clone();
        let identity = self.identity.clone();
        let stream = futures::stream::iter(1..=self.params.total_chunks)
            .then(move |n| {
                let chunks = chunks.clone();
                let key = identity.chunk_key(n);
                async move { chunks.open(&key).await }
            })
            .try_flatten();
        Box::pin(stream)
    }

    /// Best effort: the file is already durable, so failures are only logged.
    async fn delete_chunks(&self) {
        for n in 1..=self.params.total_chunks {
            let key = self.identity.chunk_key(n);
            if let Err(err) = self.chunks.delete(&key).await {
                warn!("failed to delete chunk {} after collection: {}", key, err);
            }
        }
    }

    /// Proposed persistent name, before collision avoidance.
    fn storage_filename(&self) -> UploadResult<String> {
        let filename = &self.params.filename;
        match &self.destination {
            Destination::Template(template) => {
                let mut dir = String::new();
                write!(dir, "{}", Utc::now().format(template))
                    .map_err(|_| UploadError::InvalidTemplate(template.clone()))?;
                let dir = dir.trim_matches('/');
                if dir.is_empty() {
                    Ok(filename.clone())
                } else {
                    Ok(format!("{}/{}", dir, filename))
                }
            }
            Destination::Naming(naming) => Ok(naming(filename.as_str())),
        }
    }
}
