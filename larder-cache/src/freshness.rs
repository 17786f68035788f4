//! Staleness evaluation and read results.
//!
//! Every orchestrated read returns a [`CacheRead<T>`] that records where the
//! value came from, so a stale fallback is distinguishable from a hit or a
//! fresh generation without changing what the caller receives.

use chrono::Utc;
use larder_core::{BinaryResult, ProducerError, StoredEntry, Timestamp};
use std::time::Duration;

/// Whether `entry` must be regenerated at `now`.
///
/// `None` never expires. A zero window expires every existing entry, so each
/// call regenerates. Otherwise the entry expires once its age exceeds the window.
pub fn is_expired(entry: &StoredEntry, stale_after: Option<Duration>, now: Timestamp) -> bool {
    match stale_after {
        None => false,
        Some(window) if window.is_zero() => true,
        Some(window) => entry.age(now) > window,
    }
}

/// Where the value of a [`CacheRead`] came from.
#[derive(Debug, Clone)]
pub enum ReadSource {
    /// Served from storage without invoking the producer.
    Hit,
    /// Produced during this call and written back.
    Generated,
    /// The producer failed and the existing entry was served instead.
    StaleFallback {
        /// The producer failure that was suppressed.
        error: ProducerError,
    },
}

/// Result of an orchestrated read, carrying provenance metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// Last-modified time of the stored entry backing this value.
    last_modified: Timestamp,
    /// Resolved media type.
    mime_type: String,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    /// A value served from storage.
    pub fn from_cache(value: T, last_modified: Timestamp, mime_type: impl Into<String>) -> Self {
        Self {
            value,
            last_modified,
            mime_type: mime_type.into(),
            source: ReadSource::Hit,
        }
    }

    /// A value produced during this call.
    pub fn generated(value: T, last_modified: Timestamp, mime_type: impl Into<String>) -> Self {
        Self {
            value,
            last_modified,
            mime_type: mime_type.into(),
            source: ReadSource::Generated,
        }
    }

    /// An existing value served because the producer failed.
    pub fn stale_fallback(
        value: T,
        last_modified: Timestamp,
        mime_type: impl Into<String>,
        error: ProducerError,
    ) -> Self {
        Self {
            value,
            last_modified,
            mime_type: mime_type.into(),
            source: ReadSource::StaleFallback { error },
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn source(&self) -> &ReadSource {
        &self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        matches!(self.source, ReadSource::Hit)
    }

    pub fn was_generated(&self) -> bool {
        matches!(self.source, ReadSource::Generated)
    }

    pub fn is_stale_fallback(&self) -> bool {
        matches!(self.source, ReadSource::StaleFallback { .. })
    }

    /// The suppressed producer error, for stale fallbacks.
    pub fn fallback_error(&self) -> Option<&ProducerError> {
        match &self.source {
            ReadSource::StaleFallback { error } => Some(error),
            _ => None,
        }
    }

    /// Age of the backing entry.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.last_modified)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            last_modified: self.last_modified,
            mime_type: self.mime_type,
            source: self.source,
        }
    }
}

impl CacheRead<Vec<u8>> {
    /// Wrap the bytes with their media type and extension hint.
    pub fn into_binary_result(self) -> BinaryResult {
        BinaryResult::new(self.value, self.mime_type)
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_aged(secs: i64) -> (StoredEntry, Timestamp) {
        let now = Utc::now();
        let entry = StoredEntry::new(vec![], "application/json", now - chrono::Duration::seconds(secs));
        (entry, now)
    }

    #[test]
    fn test_no_window_never_expires() {
        let (entry, now) = entry_aged(86_400 * 365);
        assert!(!is_expired(&entry, None, now));
    }

    #[test]
    fn test_zero_window_always_expires() {
        let (entry, now) = entry_aged(0);
        assert!(is_expired(&entry, Some(Duration::ZERO), now));
    }

    #[test]
    fn test_window_boundary() {
        let (entry, now) = entry_aged(60);
        assert!(!is_expired(&entry, Some(Duration::from_secs(60)), now));
        assert!(is_expired(&entry, Some(Duration::from_secs(59)), now));
        assert!(!is_expired(&entry, Some(Duration::from_secs(61)), now));
    }

    #[test]
    fn test_future_entry_is_fresh() {
        let now = Utc::now();
        let entry = StoredEntry::new(vec![], "application/json", now + chrono::Duration::seconds(30));
        assert!(!is_expired(&entry, Some(Duration::from_secs(1)), now));
    }

    #[test]
    fn test_read_sources() {
        let now = Utc::now();
        let hit = CacheRead::from_cache(1, now, "application/json");
        assert!(hit.was_cache_hit());
        assert!(hit.fallback_error().is_none());

        let generated = CacheRead::generated(2, now, "application/json");
        assert!(generated.was_generated());

        let fallback = CacheRead::stale_fallback(3, now, "application/json", ProducerError::msg("timeout"));
        assert!(fallback.is_stale_fallback());
        assert_eq!(fallback.fallback_error().unwrap().to_string(), "timeout");
        assert_eq!(fallback.into_value(), 3);
    }

    #[test]
    fn test_map_preserves_metadata() {
        let now = Utc::now();
        let read = CacheRead::from_cache(42i32, now, "text/plain").map(|v| v.to_string());
        assert_eq!(read.value(), "42");
        assert_eq!(read.mime_type(), "text/plain");
        assert_eq!(read.last_modified(), now);
        assert!(read.was_cache_hit());
    }

    #[test]
    fn test_into_binary_result() {
        let read = CacheRead::generated(vec![1u8, 2], Utc::now(), "image/gif");
        let result = read.into_binary_result();
        assert_eq!(result.data, vec![1, 2]);
        assert_eq!(result.mime_type, "image/gif");
        assert_eq!(result.file_extension.as_deref(), Some("gif"));
    }
}
