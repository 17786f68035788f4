//! LMDB-backed storage implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store. The media type is kept as native metadata next to the
//! payload, so binary entries need no naming convention.
//!
//! # Value Format
//!
//! `[last_modified_ms: i64 LE][mime_len: u16 LE][mime bytes][payload]`
//!
//! # Key Format
//!
//! `[representation: 1 byte][logical key bytes]`. The representation byte
//! keeps the structured and binary entries of one logical key apart.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses read transactions for
//! `read`/`exists` and write transactions for `write`/`delete`.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use larder_core::{
    LarderError, LarderResult, Representation, StorageError, StorageId, StoredEntry, Timestamp,
};

use super::traits::{monotonic_stamp, StorageBackend};

/// LMDB's compiled-in maximum key size.
const MAX_KEY_BYTES: usize = 511;

/// Size of the fixed header before the media type bytes.
const HEADER_BYTES: usize = 10;

/// Error type for LMDB storage operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value did not match the expected layout.
    #[error("Corrupt value: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbError to LarderError.
impl From<LmdbError> for LarderError {
    fn from(e: LmdbError) -> Self {
        LarderError::Storage(StorageError::Unavailable {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed storage.
///
/// # Example
///
/// ```ignore
/// let backend = LmdbBackend::new("/tmp/larder", 64)?;
/// let id = StorageId::binary("thumb")?;
/// backend.write(&id, &png_bytes, "image/png").await?;
/// ```
pub struct LmdbBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbBackend {
    /// Create a new LMDB backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbError::Transaction(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB backend");

        Ok(Self { env, db })
    }

    /// Encode a storage id as an LMDB key.
    fn encode_key(id: &StorageId) -> LarderResult<Vec<u8>> {
        let tag = match id.representation() {
            Representation::Structured => b's',
            Representation::Binary => b'b',
        };
        let mut key = Vec::with_capacity(1 + id.key().len());
        key.push(tag);
        key.extend_from_slice(id.key().as_bytes());

        if key.len() > MAX_KEY_BYTES {
            return Err(StorageError::InvalidId {
                id: id.to_string(),
                reason: format!("key exceeds {} bytes", MAX_KEY_BYTES - 1),
            }
            .into());
        }
        Ok(key)
    }

    /// Encode an entry value.
    fn encode_value(payload: &[u8], mime_type: &str, stamp: Timestamp) -> Result<Vec<u8>, LmdbError> {
        let mime_len = u16::try_from(mime_type.len())
            .map_err(|_| LmdbError::Corrupt("media type too long".to_string()))?;

        let mut value = Vec::with_capacity(HEADER_BYTES + mime_type.len() + payload.len());
        value.extend_from_slice(&stamp.timestamp_millis().to_le_bytes());
        value.extend_from_slice(&mime_len.to_le_bytes());
        value.extend_from_slice(mime_type.as_bytes());
        value.extend_from_slice(payload);
        Ok(value)
    }

    /// Decode the stamp from an encoded value.
    fn decode_stamp(bytes: &[u8]) -> Result<Timestamp, LmdbError> {
        let stamp_bytes: [u8; 8] = bytes
            .get(0..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| LmdbError::Corrupt("missing timestamp".to_string()))?;
        DateTime::from_timestamp_millis(i64::from_le_bytes(stamp_bytes))
            .ok_or_else(|| LmdbError::Corrupt("timestamp out of range".to_string()))
    }

    /// Decode a full entry.
    fn decode_value(bytes: &[u8]) -> Result<StoredEntry, LmdbError> {
        let last_modified = Self::decode_stamp(bytes)?;

        let len_bytes: [u8; 2] = bytes
            .get(8..HEADER_BYTES)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| LmdbError::Corrupt("missing media type length".to_string()))?;
        let mime_end = HEADER_BYTES + u16::from_le_bytes(len_bytes) as usize;

        let mime_type = bytes
            .get(HEADER_BYTES..mime_end)
            .ok_or_else(|| LmdbError::Corrupt("truncated media type".to_string()))?;
        let mime_type = std::str::from_utf8(mime_type)
            .map_err(|e| LmdbError::Corrupt(e.to_string()))?;

        Ok(StoredEntry::new(
            bytes[mime_end..].to_vec(),
            mime_type,
            last_modified,
        ))
    }
}

fn read_failed(id: &StorageId, reason: impl ToString) -> LarderError {
    StorageError::ReadFailed {
        id: id.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn write_failed(id: &StorageId, reason: impl ToString) -> LarderError {
    StorageError::WriteFailed {
        id: id.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[async_trait]
impl StorageBackend for LmdbBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn read(&self, id: &StorageId) -> LarderResult<Option<StoredEntry>> {
        let key = Self::encode_key(id)?;
        let rtxn = self.env.read_txn().map_err(|e| read_failed(id, e))?;

        match self.db.get(&rtxn, &key) {
            Ok(Some(bytes)) => Self::decode_value(bytes)
                .map(Some)
                .map_err(|e| read_failed(id, e)),
            Ok(None) => Ok(None),
            Err(e) => Err(read_failed(id, e)),
        }
    }

    async fn write(
        &self,
        id: &StorageId,
        payload: &[u8],
        mime_type: &str,
    ) -> LarderResult<Timestamp> {
        let key = Self::encode_key(id)?;
        let mut wtxn = self.env.write_txn().map_err(|e| write_failed(id, e))?;

        // A corrupt previous value must not block the overwrite.
        let previous = self
            .db
            .get(&wtxn, &key)
            .map_err(|e| write_failed(id, e))?
            .and_then(|bytes| Self::decode_stamp(bytes).ok());
        // Stored at millisecond precision, so the returned stamp must be too.
        let stamp = monotonic_stamp(previous, Utc::now().trunc_subsecs(3));

        let value = Self::encode_value(payload, mime_type, stamp).map_err(|e| write_failed(id, e))?;
        self.db
            .put(&mut wtxn, &key, &value)
            .map_err(|e| write_failed(id, e))?;
        wtxn.commit().map_err(|e| write_failed(id, e))?;

        tracing::debug!(id = %id, bytes = payload.len(), "Wrote LMDB entry");
        Ok(stamp)
    }

    async fn delete(&self, id: &StorageId) -> LarderResult<()> {
        let key = Self::encode_key(id)?;
        let delete_failed = |e: heed::Error| -> LarderError {
            StorageError::DeleteFailed {
                id: id.to_string(),
                reason: e.to_string(),
            }
            .into()
        };

        let mut wtxn = self.env.write_txn().map_err(delete_failed)?;
        self.db.delete(&mut wtxn, &key).map_err(delete_failed)?;
        wtxn.commit().map_err(delete_failed)?;
        Ok(())
    }

    async fn exists(&self, id: &StorageId) -> LarderResult<bool> {
        let key = Self::encode_key(id)?;
        let rtxn = self.env.read_txn().map_err(|e| read_failed(id, e))?;
        self.db
            .get(&rtxn, &key)
            .map(|v| v.is_some())
            .map_err(|e| read_failed(id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend = LmdbBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_new_backend() {
        let (backend, _temp_dir) = create_test_backend();
        assert_eq!(backend.name(), "lmdb");
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (backend, _temp_dir) = create_test_backend();
        let id = StorageId::binary("thumb").unwrap();

        let stamp = backend.write(&id, b"\x89PNG", "image/png").await.expect("write should succeed");
        let entry = backend
            .read(&id)
            .await
            .expect("read should succeed")
            .expect("entry should exist");

        assert_eq!(entry.payload, b"\x89PNG");
        assert_eq!(entry.mime_type, "image/png");
        assert_eq!(entry.last_modified, stamp);
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        let id = StorageId::structured("missing").unwrap();
        assert!(backend.read(&id).await.expect("read should succeed").is_none());
        assert!(!backend.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_representations_are_separate_keys() {
        let (backend, _temp_dir) = create_test_backend();
        let structured = StorageId::structured("t").unwrap();
        let binary = StorageId::binary("t").unwrap();

        backend.write(&structured, b"{}", "application/json").await.unwrap();
        assert!(backend.exists(&structured).await.unwrap());
        assert!(!backend.exists(&binary).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let (backend, _temp_dir) = create_test_backend();
        let id = StorageId::structured("t").unwrap();
        backend.write(&id, b"{}", "application/json").await.unwrap();

        backend.delete(&id).await.expect("delete should succeed");
        backend.delete(&id).await.expect("second delete should succeed");
        assert!(backend.read(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stamps_are_monotonic() {
        let (backend, _temp_dir) = create_test_backend();
        let id = StorageId::binary("t").unwrap();

        let mut last = backend.write(&id, b"0", "text/plain").await.unwrap();
        for i in 1..10u8 {
            let stamp = backend.write(&id, &[i], "text/plain").await.unwrap();
            assert!(stamp > last);
            assert_eq!(backend.read(&id).await.unwrap().unwrap().last_modified, stamp);
            last = stamp;
        }
    }

    #[tokio::test]
    async fn test_oversized_key_rejected() {
        let (backend, _temp_dir) = create_test_backend();
        let id = StorageId::binary("k".repeat(600)).unwrap();
        let err = backend.write(&id, b"x", "text/plain").await.unwrap_err();
        assert!(matches!(
            err,
            LarderError::Storage(StorageError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_value_layout_round_trip() {
        let stamp = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let encoded = LmdbBackend::encode_value(b"payload", "text/csv", stamp).unwrap();
        let entry = LmdbBackend::decode_value(&encoded).unwrap();

        assert_eq!(entry.payload, b"payload");
        assert_eq!(entry.mime_type, "text/csv");
        assert_eq!(entry.last_modified, stamp);
    }

    #[test]
    fn test_truncated_value_is_corrupt() {
        assert!(matches!(
            LmdbBackend::decode_value(&[1, 2, 3]),
            Err(LmdbError::Corrupt(_))
        ));
    }
}
