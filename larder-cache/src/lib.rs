//! LARDER Cache - Cache-Aside Orchestration
//!
//! Wraps an expensive async producer with durable caching:
//!
//! - Serve the stored value while it is fresh
//! - Regenerate missing or stale values, handing the producer the previous one
//! - Fall back to the stale value when the producer fails, if the caller opted in
//! - Keep structured (JSON) and binary values under the same logical key
//!
//! # Architecture
//!
//! ```text
//! caller ──► CacheOrchestrator ──► ValueCodec (JSON | bytes)
//!                  │
//!                  ├── SingleFlight (optional, per storage id)
//!                  │
//!                  └── Arc<dyn StorageBackend> (memory | local dir | LMDB)
//! ```
//!
//! The orchestrator holds no cache state of its own. Freshness is judged from
//! the backend's last-modified stamp on every call.

pub mod codec;
pub mod freshness;
pub mod orchestrator;
pub mod single_flight;
pub mod stats;

pub use codec::{encode_json, BinaryCodec, JsonCodec, ValueCodec};
pub use freshness::{is_expired, CacheRead, ReadSource};
pub use orchestrator::CacheOrchestrator;
pub use single_flight::{FlightGuard, SingleFlight};
pub use stats::CacheStats;

pub use larder_core::{
    BinaryResult, CacheOptions, LarderConfig, LarderError, LarderResult, ProducerError,
    Representation, StorageConfig,
};
pub use larder_storage::{open_backend, InMemoryBackend, LmdbBackend, LocalDirBackend, StorageBackend};

