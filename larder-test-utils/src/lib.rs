//! LARDER Test Utilities
//!
//! Shared test infrastructure for the LARDER workspace:
//! - A scriptable storage backend with fault injection and backdating
//! - Counting producers for asserting how often regeneration ran
//! - Proptest generators for keys, payloads and JSON values
//! - Fixtures that open every backend in a temporary directory

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use larder_core::{LarderResult, StorageError, StorageId, StoredEntry, Timestamp};
use larder_storage::{stamp_after, StorageBackend};

// Re-export core types for convenience
pub use larder_core::{
    BinaryResult, CacheOptions, LarderConfig, LarderError, ProducerError, Representation,
    StorageConfig,
};

// ============================================================================
// MOCK BACKEND
// ============================================================================

/// In-memory backend whose failures and clock can be scripted.
///
/// Reads, writes and deletes are counted. Any of them can be made to fail
/// with a [`StorageError`], and stored entries can be aged without sleeping.
#[derive(Debug, Default)]
pub struct MockBackend {
    entries: RwLock<HashMap<StorageId, StoredEntry>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete fail (or succeed again).
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a stored entry, bypassing counters and fault injection.
    pub fn entry(&self, id: &StorageId) -> Option<StoredEntry> {
        self.entries.read().ok().and_then(|e| e.get(id).cloned())
    }

    /// Store an entry verbatim, including its timestamp.
    pub fn insert_raw(&self, id: StorageId, entry: StoredEntry) -> LarderResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(id, entry);
        Ok(())
    }

    /// Move an entry's last-modified time `by` into the past.
    ///
    /// Returns `false` if nothing is stored under `id`.
    pub fn backdate(&self, id: &StorageId, by: Duration) -> LarderResult<bool> {
        let by = chrono::Duration::from_std(by).map_err(|e| StorageError::WriteFailed {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(match entries.get_mut(id) {
            Some(entry) => {
                entry.last_modified -= by;
                true
            }
            None => false,
        })
    }

    /// Overwrite an entry's last-modified time.
    pub fn set_last_modified(&self, id: &StorageId, stamp: Timestamp) -> LarderResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(match entries.get_mut(id) {
            Some(entry) => {
                entry.last_modified = stamp;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn read(&self, id: &StorageId) -> LarderResult<Option<StoredEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed {
                id: id.to_string(),
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(id).cloned())
    }

    async fn write(
        &self,
        id: &StorageId,
        payload: &[u8],
        mime_type: &str,
    ) -> LarderResult<Timestamp> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                id: id.to_string(),
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let stamp = stamp_after(entries.get(id).map(|e| e.last_modified));
        entries.insert(id.clone(), StoredEntry::new(payload.to_vec(), mime_type, stamp));
        Ok(stamp)
    }

    async fn delete(&self, id: &StorageId) -> LarderResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed {
                id: id.to_string(),
                reason: "injected delete failure".to_string(),
            }
            .into());
        }
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(id);
        Ok(())
    }
}

// ============================================================================
// PRODUCERS
// ============================================================================

/// Error returned by failing test producers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProducerFailure(pub String);

/// Hands out producer closures and counts how often they ran.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct CountingProducer {
    calls: Arc<AtomicUsize>,
    with_previous: Arc<AtomicUsize>,
}

impl CountingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total producer invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Invocations that received a previous value.
    pub fn calls_with_previous(&self) -> usize {
        self.with_previous.load(Ordering::SeqCst)
    }

    /// Producer that always succeeds with `value`.
    pub fn returning<T>(
        &self,
        value: T,
    ) -> impl FnOnce(Option<T>) -> std::future::Ready<Result<T, ProducerFailure>> + Send
    where
        T: Send + 'static,
    {
        let counter = self.clone();
        move |previous| {
            counter.record(previous.is_some());
            std::future::ready(Ok(value))
        }
    }

    /// Producer that derives its result from the previous value.
    pub fn deriving<T, G>(
        &self,
        derive: G,
    ) -> impl FnOnce(Option<T>) -> std::future::Ready<Result<T, ProducerFailure>> + Send
    where
        T: Send + 'static,
        G: FnOnce(Option<T>) -> T + Send + 'static,
    {
        let counter = self.clone();
        move |previous| {
            counter.record(previous.is_some());
            std::future::ready(Ok(derive(previous)))
        }
    }

    /// Producer that always fails with `message`.
    pub fn failing<T>(
        &self,
        message: &str,
    ) -> impl FnOnce(Option<T>) -> std::future::Ready<Result<T, ProducerFailure>> + Send
    where
        T: Send + 'static,
    {
        let counter = self.clone();
        let message = message.to_string();
        move |previous| {
            counter.record(previous.is_some());
            std::future::ready(Err(ProducerFailure(message)))
        }
    }

    fn record(&self, had_previous: bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if had_previous {
            self.with_previous.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber filtered by `RUST_LOG` for the current test binary.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys, payloads and values.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Logical keys: mostly path-like ones, plus URL-ish keys full of
    /// separators and fully arbitrary text.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => "[a-z][a-z0-9_-]{0,11}(/[a-z][a-z0-9_-]{0,11}){0,2}",
            1 => "[a-zA-Z0-9/.:?&=%\\\\-]{1,32}",
            1 => "(?s).{1,48}",
        ]
    }

    /// Arbitrary binary payloads, including empty ones.
    pub fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..512)
    }

    /// Media types with a registered extension plus the generic binary type.
    pub fn arb_mime_type() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("application/octet-stream"),
            Just("application/pdf"),
            Just("image/png"),
            Just("image/jpeg"),
            Just("text/plain"),
            Just("text/csv"),
        ]
    }

    /// Staleness windows: unbounded, always-stale, or a few seconds to a day.
    pub fn arb_stale_after() -> impl Strategy<Value = Option<Duration>> {
        prop_oneof![
            Just(None),
            Just(Some(Duration::ZERO)),
            (1u64..86_400).prop_map(|secs| Some(Duration::from_secs(secs))),
        ]
    }

    /// JSON values that survive a serialize/deserialize round trip unchanged.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,24}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built backends for contract tests.

    use super::*;
    use larder_storage::{LmdbBackend, LocalDirBackend};
    use tempfile::TempDir;

    /// LMDB map size used by test environments.
    pub const TEST_LMDB_MAP_SIZE_MB: usize = 16;

    /// A fresh local-directory backend in its own temp dir.
    pub fn local_dir_backend() -> LarderResult<(TempDir, LocalDirBackend)> {
        let dir = temp_dir()?;
        let backend = LocalDirBackend::new(dir.path())?;
        Ok((dir, backend))
    }

    /// A fresh LMDB backend in its own temp dir.
    pub fn lmdb_backend() -> LarderResult<(TempDir, LmdbBackend)> {
        let dir = temp_dir()?;
        let backend = LmdbBackend::new(dir.path(), TEST_LMDB_MAP_SIZE_MB)?;
        Ok((dir, backend))
    }

    /// Every real backend, each isolated in its own temp dir.
    ///
    /// Keep the returned directories alive for as long as the backends are used.
    pub fn all_backends() -> LarderResult<(Vec<TempDir>, Vec<Arc<dyn StorageBackend>>)> {
        let (fs_dir, fs) = local_dir_backend()?;
        let (lmdb_dir, lmdb) = lmdb_backend()?;
        let backends: Vec<Arc<dyn StorageBackend>> = vec![
            Arc::new(larder_storage::InMemoryBackend::new()),
            Arc::new(fs),
            Arc::new(lmdb),
        ];
        Ok((vec![fs_dir, lmdb_dir], backends))
    }

    fn temp_dir() -> LarderResult<TempDir> {
        TempDir::new().map_err(|e| {
            StorageError::Unavailable {
                reason: e.to_string(),
            }
            .into()
        })
    }
}
