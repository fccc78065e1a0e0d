//! In-process chunk storage.
//!
//! Only visible to the process that owns it, so it suits single-instance
//! deployments and tests. Multi-process setups need a shared backend.

use super::{ByteStream, ChunkStorage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryChunkStorage {
    chunks: RwLock<BTreeMap<String, (Bytes, DateTime<Utc>)>>,
}

impl MemoryChunkStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    #[cfg(test)]
    pub async fn set_modified(&self, key: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.chunks.write().await.get_mut(key) {
            entry.1 = at;
        }
    }
}

#[async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.chunks.read().await.contains_key(key))
    }

    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.chunks
            .write()
            .await
            .insert(key.to_string(), (data, Utc::now()));
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self
            .chunks
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.chunks
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .chunks
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn modified(&self, key: &str) -> StorageResult<DateTime<Utc>> {
        self.chunks
            .read()
            .await
            .get(key)
            .map(|(_, at)| *at)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::read_all;

    #[tokio::test]
    async fn save_overwrites_and_open_returns_latest() {
        let store = MemoryChunkStorage::new();
        store.save("k", Bytes::from_static(b"one")).await.unwrap();
        store.save("k", Bytes::from_static(b"two")).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(read_all(store.open("k").await.unwrap()).await, b"two");
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryChunkStorage::new();
        for key in ["b_part_0002", "a_part_0001", "b_part_0001", "c"] {
            store.save(key, Bytes::new()).await.unwrap();
        }
        assert_eq!(
            store.list("b_part_").await.unwrap(),
            vec!["b_part_0001", "b_part_0002"]
        );
        assert_eq!(store.list_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn missing_keys_are_not_found() {
        let store = MemoryChunkStorage::new();
        assert!(!store.exists("nope").await.unwrap());
        assert!(matches!(
            store.open("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.modified("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
