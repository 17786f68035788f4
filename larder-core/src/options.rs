//! Per-call cache options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LarderConfig;

/// Options for one cache call.
///
/// Whether a call is structured or binary is fixed by the entry point, so the
/// options carry no representation.
///
/// | field | default |
/// |---|---|
/// | `stale_after` | `None` (entries never go stale) |
/// | `return_stale_on_error` | `false` |
/// | `mime_type` | `None` (inferred) |
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Age past which a stored entry is regenerated. Zero regenerates on every call.
    pub stale_after: Option<Duration>,
    /// Serve the existing value when the producer fails.
    pub return_stale_on_error: bool,
    /// Explicit media type; wins over the stored one.
    pub mime_type: Option<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from configured defaults.
    pub fn from_config(config: &LarderConfig) -> Self {
        Self {
            stale_after: config.default_stale_after,
            return_stale_on_error: config.return_stale_on_error,
            ..Self::default()
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Same as [`with_stale_after`](Self::with_stale_after) in whole seconds.
    pub fn with_stale_after_secs(self, secs: u64) -> Self {
        self.with_stale_after(Duration::from_secs(secs))
    }

    pub fn with_return_stale_on_error(mut self, enabled: bool) -> Self {
        self.return_stale_on_error = enabled;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}
