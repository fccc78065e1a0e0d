//! UploadService: shared application state behind the upload endpoints.
//!
//! Holds the storage backends picked at startup plus the named destinations,
//! and builds a fresh [`ResumableFile`] for every request.

use super::{UploadError, UploadResult, resumable_file::ResumableFile};
use crate::{
    models::{destination::Destination, stored_file::StoredFile, upload::UploadParams},
    storage::{ChunkStorage, PersistentStorage},
};
use bytes::Bytes;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Name of the destination used when a request does not pick one.
pub const DEFAULT_DESTINATION: &str = "default";

/// Result of a chunk upload or status check.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// The chunk is stored; more are needed.
    Uploaded,
    /// Status check: the chunk is stored; more are needed.
    Exists,
    /// Status check: the chunk is not stored yet.
    Missing,
    /// The upload was complete and has been collected.
    Collected(StoredFile),
}

#[derive(Clone)]
pub struct UploadService {
    chunks: Arc<dyn ChunkStorage>,
    persistent: Arc<dyn PersistentStorage>,
    destinations: Arc<HashMap<String, Destination>>,
}

impl UploadService {
    pub fn new(
        chunks: Arc<dyn ChunkStorage>,
        persistent: Arc<dyn PersistentStorage>,
        destinations: HashMap<String, Destination>,
    ) -> Self {
        Self {
            chunks,
            persistent,
            destinations: Arc::new(destinations),
        }
    }

    pub fn chunk_storage(&self) -> &Arc<dyn ChunkStorage> {
        &self.chunks
    }

    pub fn persistent_storage(&self) -> &Arc<dyn PersistentStorage> {
        &self.persistent
    }

    /// Coordinator for one request against the named destination.
    pub fn resumable_file(
        &self,
        user: &str,
        field: &str,
        params: UploadParams,
    ) -> UploadResult<ResumableFile> {
        let destination = self
            .destinations
            .get(field)
            .cloned()
            .ok_or_else(|| UploadError::UnknownDestination(field.to_string()))?;
        ResumableFile::new(
            destination,
            user,
            field,
            params,
            self.chunks.clone(),
            self.persistent.clone(),
        )
    }

    /// Chunk upload: store unless already present, then collect if complete.
    pub async fn upload_chunk(
        &self,
        user: &str,
        field: &str,
        params: UploadParams,
        data: Bytes,
    ) -> UploadResult<ChunkOutcome> {
        let file = self.resumable_file(user, field, params)?;
        if file.chunk_exists().await? {
            debug!("chunk {} already stored, skipping", file.current_chunk_key());
        } else {
            file.process_chunk(data).await?;
        }
        if file.is_complete().await? {
            return Ok(ChunkOutcome::Collected(file.collect().await?));
        }
        Ok(ChunkOutcome::Uploaded)
    }

    /// Status check used by clients to decide which chunks to resend.
    pub async fn check_chunk(
        &self,
        user: &str,
        field: &str,
        params: UploadParams,
    ) -> UploadResult<ChunkOutcome> {
        let file = self.resumable_file(user, field, params)?;
        if !file.chunk_exists().await? {
            return Ok(ChunkOutcome::Missing);
        }
        if file.is_complete().await? {
            return Ok(ChunkOutcome::Collected(file.collect().await?));
        }
        Ok(ChunkOutcome::Exists)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{chunk_memory::MemoryChunkStorage, test_support::persistent};
    use tempfile::TempDir;

    pub(crate) async fn service() -> (TempDir, Arc<MemoryChunkStorage>, UploadService) {
        let (dir, storage) = persistent().await;
        let chunks = Arc::new(MemoryChunkStorage::new());
        let mut destinations = HashMap::new();
        destinations.insert(DEFAULT_DESTINATION.to_string(), Destination::template("uploads"));
        destinations.insert(
            "avatars".to_string(),
            Destination::naming(|f| format!("avatars/{}", f)),
        );
        let service = UploadService::new(chunks.clone(), Arc::new(storage), destinations);
        (dir, chunks, service)
    }

    fn params(chunk: u32, total: u32) -> UploadParams {
        UploadParams {
            unique_identifier: "abc".into(),
            filename: "doc.pdf".into(),
            chunk_number: chunk,
            total_chunks: total,
            chunk_size: Some(1),
            total_size: Some(total as u64),
        }
    }

    #[tokio::test]
    async fn upload_flow_collects_on_last_chunk() {
        let (_dir, chunks, service) = service().await;

        let out = service
            .upload_chunk("u", DEFAULT_DESTINATION, params(2, 2), Bytes::from_static(b"2"))
            .await
            .unwrap();
        assert!(matches!(out, ChunkOutcome::Uploaded));

        let out = service
            .upload_chunk("u", DEFAULT_DESTINATION, params(1, 2), Bytes::from_static(b"1"))
            .await
            .unwrap();
        match out {
            ChunkOutcome::Collected(stored) => {
                assert_eq!(stored.name, "uploads/doc.pdf");
                assert_eq!(stored.size_bytes, 2);
            }
            other => panic!("expected collection, got {:?}", other),
        }
        assert_eq!(chunks.len().await, 0);
    }

    #[tokio::test]
    async fn duplicate_upload_skips_processing() {
        let (_dir, chunks, service) = service().await;
        for _ in 0..2 {
            let out = service
                .upload_chunk("u", DEFAULT_DESTINATION, params(1, 3), Bytes::from_static(b"1"))
                .await
                .unwrap();
            assert!(matches!(out, ChunkOutcome::Uploaded));
        }
        assert_eq!(chunks.len().await, 1);
    }

    #[tokio::test]
    async fn status_check_reports_missing_existing_and_collects() {
        let (_dir, _chunks, service) = service().await;

        let out = service.check_chunk("u", "avatars", params(1, 2)).await.unwrap();
        assert!(matches!(out, ChunkOutcome::Missing));

        service
            .upload_chunk("u", "avatars", params(1, 2), Bytes::from_static(b"a"))
            .await
            .unwrap();
        let out = service.check_chunk("u", "avatars", params(1, 2)).await.unwrap();
        assert!(matches!(out, ChunkOutcome::Exists));

        // store chunk 2 directly so only the status check completes the upload
        service
            .resumable_file("u", "avatars", params(2, 2))
            .unwrap()
            .process_chunk(Bytes::from_static(b"b"))
            .await
            .unwrap();
        match service.check_chunk("u", "avatars", params(2, 2)).await.unwrap() {
            ChunkOutcome::Collected(stored) => assert_eq!(stored.name, "avatars/doc.pdf"),
            other => panic!("expected collection, got {:?}", other),
        }

        let out = service.check_chunk("u", "avatars", params(2, 2)).await.unwrap();
        assert!(matches!(out, ChunkOutcome::Missing));
    }

    #[tokio::test]
    async fn users_do_not_share_chunks() {
        let (_dir, _chunks, service) = service().await;
        service
            .upload_chunk("alice", DEFAULT_DESTINATION, params(1, 2), Bytes::from_static(b"a"))
            .await
            .unwrap();
        let out = service
            .check_chunk("bob", DEFAULT_DESTINATION, params(1, 2))
            .await
            .unwrap();
        assert!(matches!(out, ChunkOutcome::Missing));
    }

    #[tokio::test]
    async fn unknown_destination_is_rejected() {
        let (_dir, _chunks, service) = service().await;
        assert!(matches!(
            service.check_chunk("u", "nope", params(1, 1)).await,
            Err(UploadError::UnknownDestination(_))
        ));
    }
}
