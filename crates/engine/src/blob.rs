//! The out-of-scope blob-storage boundary. `report_artifact` stores bytes
//! through this trait and threads back only an opaque [`StoragePointer`];
//! the engine never interprets the pointer's `key`.

use async_trait::async_trait;
use ledger_core::{BlobProvider, CoreError, CoreResult, StoragePointer};
use parking_lot::Mutex;
use std::collections::HashMap;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8]) -> CoreResult<StoragePointer>;
    async fn get(&self, pointer: &StoragePointer) -> CoreResult<Vec<u8>>;
}

/// Content-keyed in-memory blob store for tests and single-node demos.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> CoreResult<StoragePointer> {
        let key = ledger_core::artifact::content_sha256_hex(bytes);
        self.blobs.lock().insert(key.clone(), bytes.to_vec());
        Ok(StoragePointer {
            provider: BlobProvider::Memory,
            key,
            bucket: None,
        })
    }

    async fn get(&self, pointer: &StoragePointer) -> CoreResult<Vec<u8>> {
        self.blobs
            .lock()
            .get(&pointer.key)
            .cloned()
            .ok_or(CoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bytes_through_content_key() {
        let store = MemoryBlobStore::new();
        let pointer = store.put(b"hello").await.unwrap();
        assert_eq!(store.get(&pointer).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn unknown_pointer_is_not_found() {
        let store = MemoryBlobStore::new();
        let pointer = StoragePointer {
            provider: BlobProvider::Memory,
            key: "missing".into(),
            bucket: None,
        };
        assert!(matches!(store.get(&pointer).await, Err(CoreError::NotFound)));
    }
}
