//! Storage backend contract.
//!
//! This module defines the trait every durable store behind the cache must
//! implement. Backends are interchangeable: the orchestrator only ever sees
//! bytes, a media type and a last-modified timestamp.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use larder_core::{LarderResult, StorageId, StoredEntry, Timestamp};

/// Storage backend trait for pluggable cache storage.
///
/// Implementations must be thread-safe and support concurrent access. The
/// trait is object safe so a backend can be chosen at runtime and shared as
/// `Arc<dyn StorageBackend>`.
///
/// # Contract
///
/// - `read` returns `Ok(None)` when nothing is stored. Absence is never an error.
/// - `write` always overwrites and stamps the entry's last-modified time itself.
///   Stamps for one id never go backwards across successive writes.
/// - `delete` of a missing id succeeds.
/// - Media types for binary entries are recovered by the backend, either from
///   native metadata or from a physical naming convention.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Read the entry stored under `id`.
    async fn read(&self, id: &StorageId) -> LarderResult<Option<StoredEntry>>;

    /// Write `payload` under `id`, returning the stamped last-modified time.
    async fn write(&self, id: &StorageId, payload: &[u8], mime_type: &str)
        -> LarderResult<Timestamp>;

    /// Delete whatever is stored under `id`.
    async fn delete(&self, id: &StorageId) -> LarderResult<()>;

    /// Whether anything is stored under `id`.
    async fn exists(&self, id: &StorageId) -> LarderResult<bool> {
        Ok(self.read(id).await?.is_some())
    }
}

/// Stamp for a new write given the previous stamp of the same id.
///
/// Returns `now` unless that would not move past `previous`, in which case the
/// stamp is nudged one millisecond after it.
pub fn monotonic_stamp(previous: Option<Timestamp>, now: Timestamp) -> Timestamp {
    match previous {
        Some(prev) if prev >= now => prev + Duration::milliseconds(1),
        _ => now,
    }
}

/// `monotonic_stamp` against the current wall clock.
pub fn stamp_after(previous: Option<Timestamp>) -> Timestamp {
    monotonic_stamp(previous, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_stamp_uses_now_when_ahead() {
        let now = Utc::now();
        let earlier = now - Duration::seconds(3);
        assert_eq!(monotonic_stamp(Some(earlier), now), now);
        assert_eq!(monotonic_stamp(None, now), now);
    }

    #[test]
    fn test_monotonic_stamp_never_goes_back() {
        let now = Utc::now();
        let later = now + Duration::seconds(3);
        let stamp = monotonic_stamp(Some(later), now);
        assert!(stamp > later);

        let same = monotonic_stamp(Some(now), now);
        assert!(same > now);
    }
}
