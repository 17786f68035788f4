//! In-memory storage backend.
//!
//! Keeps entries in a process-local map. Useful for tests and for callers
//! that only need deduplication within one process lifetime.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use larder_core::{LarderResult, StorageError, StorageId, StoredEntry, Timestamp};

use super::traits::{stamp_after, StorageBackend};

/// In-memory backend keyed by storage id.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<StorageId, StoredEntry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear_all(&self) -> LarderResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, id: &StorageId) -> LarderResult<Option<StoredEntry>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(id).cloned())
    }

    async fn write(
        &self,
        id: &StorageId,
        payload: &[u8],
        mime_type: &str,
    ) -> LarderResult<Timestamp> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let stamp = stamp_after(entries.get(id).map(|e| e.last_modified));
        entries.insert(
            id.clone(),
            StoredEntry::new(payload.to_vec(), mime_type, stamp),
        );
        Ok(stamp)
    }

    async fn delete(&self, id: &StorageId) -> LarderResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(id);
        Ok(())
    }

    async fn exists(&self, id: &StorageId) -> LarderResult<bool> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let backend = InMemoryBackend::new();
        let id = StorageId::structured("t").unwrap();

        let stamp = backend
            .write(&id, b"{\"n\":1}", "application/json")
            .await
            .unwrap();
        let entry = backend.read(&id).await.unwrap().expect("entry should exist");

        assert_eq!(entry.payload, b"{\"n\":1}");
        assert_eq!(entry.mime_type, "application/json");
        assert_eq!(entry.last_modified, stamp);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let backend = InMemoryBackend::new();
        let id = StorageId::binary("missing").unwrap();
        assert!(backend.read(&id).await.unwrap().is_none());
        assert!(!backend.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_representations_do_not_collide() {
        let backend = InMemoryBackend::new();
        let structured = StorageId::structured("t").unwrap();
        let binary = StorageId::binary("t").unwrap();

        backend.write(&structured, b"{}", "application/json").await.unwrap();
        backend.write(&binary, b"\x00\x01", "application/octet-stream").await.unwrap();

        assert_eq!(backend.read(&structured).await.unwrap().unwrap().payload, b"{}");
        assert_eq!(backend.read(&binary).await.unwrap().unwrap().payload, b"\x00\x01");
    }

    #[tokio::test]
    async fn test_stamps_are_monotonic() {
        let backend = InMemoryBackend::new();
        let id = StorageId::binary("t").unwrap();

        let mut last = backend.write(&id, b"0", "text/plain").await.unwrap();
        for i in 1..20u8 {
            let stamp = backend.write(&id, &[i], "text/plain").await.unwrap();
            assert!(stamp > last);
            last = stamp;
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = InMemoryBackend::new();
        let id = StorageId::structured("t").unwrap();
        backend.write(&id, b"1", "application/json").await.unwrap();

        backend.delete(&id).await.unwrap();
        backend.delete(&id).await.unwrap();
        assert!(backend.is_empty());
    }
}
