//! Removal of chunks left behind by abandoned uploads.

use crate::storage::{ChunkStorage, StorageError, StorageResult};
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

/// Delete every chunk not written to for longer than `max_age`.
///
/// Chunks vanishing mid-sweep (collected concurrently) are skipped. Returns
/// the number of chunks removed.
pub async fn sweep_stale_chunks(storage: &dyn ChunkStorage, max_age: Duration) -> StorageResult<usize> {
    let cutoff = Utc::now() - max_age;
    let mut removed = 0;

    for key in storage.list_all().await? {
        let modified = match storage.modified(&key).await {
            Ok(at) => at,
            Err(StorageError::NotFound(_)) => continue,
            Err(err) => {
                warn!("could not stat chunk {}: {}", key, err);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match storage.delete(&key).await {
            Ok(()) => {
                debug!("swept stale chunk {}", key);
                removed += 1;
            }
            Err(StorageError::NotFound(_)) => {}
            Err(err) => warn!("could not delete stale chunk {}: {}", key, err),
        }
    }

    info!(
        "swept {} stale chunks from {} storage",
        removed,
        storage.backend_name()
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunk_memory::MemoryChunkStorage;
    use bytes::Bytes;

    #[tokio::test]
    async fn removes_only_old_chunks() {
        let storage = MemoryChunkStorage::new();
        for key in ["old_part_0001", "old_part_0002", "fresh_part_0001"] {
            storage.save(key, Bytes::from_static(b"x")).await.unwrap();
        }
        let long_ago = Utc::now() - Duration::hours(48);
        storage.set_modified("old_part_0001", long_ago).await;
        storage.set_modified("old_part_0002", long_ago).await;

        let removed = sweep_stale_chunks(&storage, Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(storage.list_all().await.unwrap(), vec!["fresh_part_0001"]);
    }

    #[tokio::test]
    async fn empty_storage_is_fine() {
        let storage = MemoryChunkStorage::new();
        assert_eq!(
            sweep_stale_chunks(&storage, Duration::seconds(1)).await.unwrap(),
            0
        );
    }
}
