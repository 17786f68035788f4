//! Cache-aside orchestration.
//!
//! This module implements the core caching logic: resolve a storage id, read
//! the existing entry, decide whether it can be served, otherwise invoke the
//! producer once, write the result back and fall back to the stale entry when
//! the producer fails and the caller allowed it.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use larder_core::{
    media, BinaryResult, CacheOptions, LarderConfig, LarderResult, ProducerError,
    Representation, StorageId, StoredEntry,
};
use larder_storage::{open_backend, StorageBackend};
use serde::{de::DeserializeOwned, Serialize};

use super::codec::{encode_json, BinaryCodec, JsonCodec, ValueCodec};
use super::freshness::{is_expired, CacheRead};
use super::single_flight::SingleFlight;
use super::stats::{CacheStats, StatsRecorder};

/// Cache-aside orchestrator over a storage backend.
///
/// Stateless between calls: everything it knows about a key lives in the
/// backend. Concurrent calls for the same key are not coordinated unless
/// single-flight is enabled, so each may produce and write; the last write wins.
///
/// # Example
///
/// ```ignore
/// let cache = CacheOrchestrator::new(Arc::new(InMemoryBackend::new()));
///
/// let rates: Rates = cache
///     .get_or_generate(
///         "fx/eur",
///         |_previous| async { fetch_rates().await },
///         &CacheOptions::new()
///             .with_stale_after_secs(300)
///             .with_return_stale_on_error(true),
///     )
///     .await?;
/// ```
#[derive(Clone)]
pub struct CacheOrchestrator {
    backend: Arc<dyn StorageBackend>,
    single_flight: Option<Arc<SingleFlight>>,
    stats: Arc<StatsRecorder>,
}

impl CacheOrchestrator {
    /// Create an orchestrator writing through `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            single_flight: None,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    /// Open the configured backend and apply the configured single-flight mode.
    pub fn from_config(config: &LarderConfig) -> LarderResult<Self> {
        let orchestrator = Self::new(open_backend(&config.storage)?);
        Ok(if config.single_flight {
            orchestrator.with_single_flight()
        } else {
            orchestrator
        })
    }

    /// Serialize concurrent generations of the same key within this process.
    ///
    /// Clones of the orchestrator share the same lock table.
    pub fn with_single_flight(mut self) -> Self {
        self.single_flight = Some(Arc::new(SingleFlight::new()));
        self
    }

    /// Get a reference to the storage backend.
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Snapshot of hit/miss/fallback counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------
    // Structured values
    // ------------------------------------------------------------------

    /// Return the cached structured value for `key`, producing it if missing or stale.
    ///
    /// The producer receives the previous value (if any) and runs at most once.
    /// Its error is returned unchanged unless an entry existed and
    /// `options.return_stale_on_error` is set, in which case the existing value
    /// is returned instead.
    pub async fn get_or_generate<T, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> LarderResult<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(Option<T>) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: StdError + Send + Sync + 'static,
    {
        self.get_or_generate_read(key, producer, options)
            .await
            .map(CacheRead::into_value)
    }

    /// [`get_or_generate`](Self::get_or_generate), returning provenance metadata.
    pub async fn get_or_generate_read<T, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> LarderResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(Option<T>) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: StdError + Send + Sync + 'static,
    {
        self.orchestrate::<JsonCodec<T>, _, _, _>(key, producer, options)
            .await
    }

    /// Store a structured value under `key`, overwriting any existing entry.
    pub async fn put<T>(&self, key: &str, value: &T, mime_type: Option<&str>) -> LarderResult<()>
    where
        T: Serialize + ?Sized,
    {
        let id = StorageId::structured(key)?;
        let payload = encode_json(&id, value)?;
        let mime_type = mime_type.unwrap_or(Representation::Structured.default_mime_type());
        self.backend.write(&id, &payload, mime_type).await?;
        tracing::debug!(id = %id, mime_type, "Stored structured entry");
        Ok(())
    }

    /// Read the stored structured value without ever producing.
    pub async fn peek<T>(&self, key: &str) -> LarderResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        let id = StorageId::structured(key)?;
        match self.backend.read(&id).await? {
            Some(entry) => JsonCodec::<T>::decode(&id, &entry.payload).map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Binary values
    // ------------------------------------------------------------------

    /// Binary counterpart of [`get_or_generate`](Self::get_or_generate),
    /// returning the bytes with their media type and extension hint.
    pub async fn get_or_generate_binary<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> LarderResult<BinaryResult>
    where
        F: FnOnce(Option<Vec<u8>>) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send,
        E: StdError + Send + Sync + 'static,
    {
        self.get_or_generate_binary_read(key, producer, options)
            .await
            .map(CacheRead::into_binary_result)
    }

    /// Binary get-or-generate returning the raw bytes only.
    pub async fn get_or_generate_bytes<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> LarderResult<Vec<u8>>
    where
        F: FnOnce(Option<Vec<u8>>) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send,
        E: StdError + Send + Sync + 'static,
    {
        self.get_or_generate_binary_read(key, producer, options)
            .await
            .map(CacheRead::into_value)
    }

    /// Binary get-or-generate returning provenance metadata.
    pub async fn get_or_generate_binary_read<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> LarderResult<CacheRead<Vec<u8>>>
    where
        F: FnOnce(Option<Vec<u8>>) -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send,
        E: StdError + Send + Sync + 'static,
    {
        self.orchestrate::<BinaryCodec, _, _, _>(key, producer, options)
            .await
    }

    /// Store bytes under `key`. Without a media type the bytes are sniffed,
    /// falling back to `application/octet-stream`.
    pub async fn put_binary(
        &self,
        key: &str,
        data: &[u8],
        mime_type: Option<&str>,
    ) -> LarderResult<()> {
        let id = StorageId::binary(key)?;
        let mime_type = mime_type
            .or_else(|| media::sniff(data))
            .unwrap_or(media::APPLICATION_OCTET_STREAM);
        self.backend.write(&id, data, mime_type).await?;
        tracing::debug!(id = %id, mime_type, bytes = data.len(), "Stored binary entry");
        Ok(())
    }

    /// Read the stored bytes and media type without ever producing.
    pub async fn peek_binary(&self, key: &str) -> LarderResult<Option<BinaryResult>> {
        let id = StorageId::binary(key)?;
        Ok(self
            .backend
            .read(&id)
            .await?
            .map(|entry| BinaryResult::new(entry.payload, entry.mime_type)))
    }

    // ------------------------------------------------------------------
    // Key management
    // ------------------------------------------------------------------

    /// Delete the structured and binary entries for `key`. Missing entries are fine.
    pub async fn clear(&self, key: &str) -> LarderResult<()> {
        for id in StorageId::all_for(key)? {
            self.backend.delete(&id).await?;
        }
        tracing::debug!(key, backend = self.backend.name(), "Cleared cache key");
        Ok(())
    }

    /// Whether any representation is stored for `key`.
    pub async fn contains(&self, key: &str) -> LarderResult<bool> {
        for id in StorageId::all_for(key)? {
            if self.backend.exists(&id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Core algorithm
    // ------------------------------------------------------------------

    async fn orchestrate<C, F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &CacheOptions,
    ) -> LarderResult<CacheRead<C::Value>>
    where
        C: ValueCodec,
        F: FnOnce(Option<C::Value>) -> Fut + Send,
        Fut: Future<Output = Result<C::Value, E>> + Send,
        E: StdError + Send + Sync + 'static,
    {
        let id = StorageId::new(key, C::REPRESENTATION)?;

        let _flight = match &self.single_flight {
            Some(flights) => Some(flights.acquire(&id).await?),
            None => None,
        };

        let entry = match self.backend.read(&id).await? {
            Some(entry) => entry,
            None => {
                self.stats.record_miss();
                tracing::debug!(id = %id, backend = self.backend.name(), "Cache miss, generating");
                return self
                    .produce::<C, _, _, _>(&id, producer, None, None, options)
                    .await;
            }
        };

        // Undecodable entries are hard errors, never silently regenerated.
        let value = C::decode(&id, &entry.payload)?;
        let now = Utc::now();

        if !is_expired(&entry, options.stale_after, now) {
            self.stats.record_hit();
            tracing::debug!(id = %id, backend = self.backend.name(), "Cache hit");
            let mime_type = explicit_or_stored(options, &entry);
            return Ok(CacheRead::from_cache(value, entry.last_modified, mime_type));
        }

        self.stats.record_expiration();
        tracing::debug!(
            id = %id,
            age_ms = entry.age(now).as_millis() as u64,
            "Cache entry expired, regenerating"
        );
        self.produce::<C, _, _, _>(&id, producer, Some(value), Some(entry), options)
            .await
    }

    /// Run the producer once and settle its outcome.
    async fn produce<C, F, Fut, E>(
        &self,
        id: &StorageId,
        producer: F,
        previous: Option<C::Value>,
        existing: Option<StoredEntry>,
        options: &CacheOptions,
    ) -> LarderResult<CacheRead<C::Value>>
    where
        C: ValueCodec,
        F: FnOnce(Option<C::Value>) -> Fut + Send,
        Fut: Future<Output = Result<C::Value, E>> + Send,
        E: StdError + Send + Sync + 'static,
    {
        match producer(previous).await {
            Ok(value) => {
                let mime_type = match &existing {
                    Some(entry) => explicit_or_stored(options, entry),
                    None => options
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| C::infer_mime_type(&value)),
                };
                let payload = C::encode(id, &value)?;
                let last_modified = self.backend.write(id, &payload, &mime_type).await?;
                tracing::debug!(
                    id = %id,
                    mime_type = %mime_type,
                    bytes = payload.len(),
                    "Wrote regenerated entry"
                );
                self.stats.record_regeneration();
                Ok(CacheRead::generated(value, last_modified, mime_type))
            }
            Err(err) => {
                let error = ProducerError::wrap(err);
                match existing {
                    Some(entry) if options.return_stale_on_error => {
                        self.stats.record_producer_failure(true);
                        tracing::warn!(
                            id = %id,
                            error = %error,
                            last_modified = %entry.last_modified,
                            "Producer failed, serving stale entry"
                        );
                        // Re-decoded; values are not required to be Clone.
                        let value = C::decode(id, &entry.payload)?;
                        let mime_type = explicit_or_stored(options, &entry);
                        Ok(CacheRead::stale_fallback(
                            value,
                            entry.last_modified,
                            mime_type,
                            error,
                        ))
                    }
                    _ => {
                        self.stats.record_producer_failure(false);
                        tracing::warn!(id = %id, error = %error, "Producer failed");
                        Err(error.into())
                    }
                }
            }
        }
    }
}

/// Explicit media type, else the stored one.
fn explicit_or_stored(options: &CacheOptions, entry: &StoredEntry) -> String {
    options
        .mime_type
        .clone()
        .unwrap_or_else(|| entry.mime_type.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::LarderError;
    use larder_storage::InMemoryBackend;
    use serde::Deserialize;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tally {
        n: i32,
    }

    fn orchestrator() -> (CacheOrchestrator, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        (CacheOrchestrator::new(backend.clone()), backend)
    }

    fn failing(message: &'static str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, message)
    }

    #[tokio::test]
    async fn test_miss_invokes_producer_once() {
        let (cache, backend) = orchestrator();
        let calls = AtomicUsize::new(0);

        let value = cache
            .get_or_generate(
                "t",
                |previous: Option<Tally>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    assert!(previous.is_none());
                    async { Ok::<_, io::Error>(Tally { n: 7 }) }
                },
                &CacheOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(value, Tally { n: 7 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let id = StorageId::structured("t").unwrap();
        let entry = backend.read(&id).await.unwrap().expect("value should be stored");
        assert_eq!(entry.mime_type, "application/json");
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_producing() {
        let (cache, _backend) = orchestrator();
        cache.put("t", &Tally { n: 1 }, None).await.unwrap();

        let read = cache
            .get_or_generate_read(
                "t",
                |_: Option<Tally>| async { Err::<Tally, _>(failing("producer must not run")) },
                &CacheOptions::default(),
            )
            .await
            .unwrap();

        assert!(read.was_cache_hit());
        assert_eq!(read.into_value(), Tally { n: 1 });
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_passes_previous_value() {
        let (cache, _backend) = orchestrator();
        cache.put("t", &Tally { n: 1 }, None).await.unwrap();

        let value = cache
            .get_or_generate(
                "t",
                |previous: Option<Tally>| async move {
                    let prev = previous.expect("previous value should be passed");
                    Ok::<_, io::Error>(Tally { n: prev.n + 1 })
                },
                &CacheOptions::new().with_stale_after(Duration::ZERO),
            )
            .await
            .unwrap();

        assert_eq!(value, Tally { n: 2 });
        assert_eq!(cache.peek::<Tally>("t").await.unwrap(), Some(Tally { n: 2 }));
    }

    #[tokio::test]
    async fn test_failure_without_entry_propagates_and_writes_nothing() {
        let (cache, backend) = orchestrator();

        let err = cache
            .get_or_generate(
                "t",
                |_: Option<Tally>| async { Err::<Tally, _>(failing("upstream 503")) },
                &CacheOptions::new().with_return_stale_on_error(true),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "upstream 503");
        let producer = err.as_producer().expect("should be a producer error");
        assert!(producer.downcast_ref::<io::Error>().is_some());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_failure_with_entry_and_fallback_returns_stale() {
        let (cache, _backend) = orchestrator();
        cache.put("t", &Tally { n: 1 }, None).await.unwrap();

        let read = cache
            .get_or_generate_read(
                "t",
                |_: Option<Tally>| async { Err::<Tally, _>(failing("timeout")) },
                &CacheOptions::new()
                    .with_stale_after(Duration::ZERO)
                    .with_return_stale_on_error(true),
            )
            .await
            .unwrap();

        assert!(read.is_stale_fallback());
        assert_eq!(read.fallback_error().unwrap().to_string(), "timeout");
        assert_eq!(read.into_value(), Tally { n: 1 });

        let stats = cache.stats();
        assert_eq!(stats.stale_fallbacks, 1);
        assert_eq!(stats.producer_failures, 1);
    }

    #[tokio::test]
    async fn test_failure_with_entry_without_fallback_propagates() {
        let (cache, _backend) = orchestrator();
        cache.put("t", &Tally { n: 1 }, None).await.unwrap();

        let err = cache
            .get_or_generate(
                "t",
                |_: Option<Tally>| async { Err::<Tally, _>(failing("timeout")) },
                &CacheOptions::new().with_stale_after(Duration::ZERO),
            )
            .await
            .unwrap_err();

        assert!(err.as_producer().is_some());
        assert_eq!(cache.peek::<Tally>("t").await.unwrap(), Some(Tally { n: 1 }));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_decode_error() {
        let (cache, backend) = orchestrator();
        let id = StorageId::structured("t").unwrap();
        backend.write(&id, b"{broken", "application/json").await.unwrap();

        let err = cache
            .get_or_generate(
                "t",
                |_: Option<Tally>| async { Ok::<_, io::Error>(Tally { n: 2 }) },
                &CacheOptions::new().with_return_stale_on_error(true),
            )
            .await
            .unwrap_err();

        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let (cache, _backend) = orchestrator();
        let err = cache.clear("").await.unwrap_err();
        assert!(matches!(err, LarderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_explicit_mime_type_wins() {
        let (cache, backend) = orchestrator();
        cache.put_binary("img", b"\x89PNG\r\n\x1a\nxx", None).await.unwrap();

        let result = cache
            .get_or_generate_binary(
                "img",
                |_| async { Ok::<_, io::Error>(vec![]) },
                &CacheOptions::new().with_mime_type("image/x-icon"),
            )
            .await
            .unwrap();

        assert_eq!(result.mime_type, "image/x-icon");
        assert_eq!(result.file_extension.as_deref(), Some("ico"));

        let stored = backend.read(&StorageId::binary("img").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_generated_binary_keeps_stored_type() {
        let (cache, backend) = orchestrator();
        cache.put_binary("doc", b"old", Some("text/plain")).await.unwrap();

        let bytes = cache
            .get_or_generate_bytes(
                "doc",
                |_| async { Ok::<_, io::Error>(b"new".to_vec()) },
                &CacheOptions::new().with_stale_after(Duration::ZERO),
            )
            .await
            .unwrap();

        assert_eq!(bytes, b"new");
        let stored = backend.read(&StorageId::binary("doc").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn test_clear_and_contains() {
        let (cache, _backend) = orchestrator();
        cache.put("k", &Tally { n: 1 }, None).await.unwrap();
        cache.put_binary("k", b"raw", None).await.unwrap();
        assert!(cache.contains("k").await.unwrap());

        cache.clear("k").await.unwrap();
        assert!(!cache.contains("k").await.unwrap());
        assert!(cache.peek::<Tally>("k").await.unwrap().is_none());
        assert!(cache.peek_binary("k").await.unwrap().is_none());
        cache.clear("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let config = LarderConfig {
            single_flight: true,
            ..LarderConfig::default()
        };
        let cache = CacheOrchestrator::from_config(&config).unwrap();
        assert_eq!(cache.backend().name(), "memory");
        assert!(cache.single_flight.is_some());
    }
}
