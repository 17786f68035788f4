//! LARDER Core - Data Types
//!
//! Errors, per-call options, storage identifiers, stored entries, the
//! media-type registry and configuration. Every other crate depends on this.
//! No I/O lives here.

pub mod config;
pub mod entry;
pub mod error;
pub mod media;
pub mod options;

pub use config::{BackendKind, LarderConfig, StorageConfig};
pub use entry::{BinaryResult, Representation, StorageId, StoredEntry, STRUCTURED_SUFFIX};
pub use error::{
    CodecError, ConfigError, LarderError, LarderResult, ProducerError, StorageError,
    ValidationError,
};
pub use options::CacheOptions;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
