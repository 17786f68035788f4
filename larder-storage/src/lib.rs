//! LARDER Storage - Backend Contract and Implementations
//!
//! Defines the [`StorageBackend`] trait the cache orchestrator writes through,
//! plus three interchangeable backends:
//!
//! - [`InMemoryBackend`]: process-local map
//! - [`LocalDirBackend`]: one file per entry, media type from the file extension
//! - [`LmdbBackend`]: LMDB environment, media type stored as metadata
//!
//! [`open_backend`] picks one from a [`larder_core::StorageConfig`].

pub mod factory;
pub mod fs_backend;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use factory::open_backend;
pub use fs_backend::LocalDirBackend;
pub use lmdb_backend::{LmdbBackend, LmdbError};
pub use memory::InMemoryBackend;
pub use traits::{monotonic_stamp, stamp_after, StorageBackend};
