//! Backend construction from configuration.

use std::sync::Arc;

use larder_core::{BackendKind, LarderResult, StorageConfig};

use super::fs_backend::LocalDirBackend;
use super::lmdb_backend::LmdbBackend;
use super::memory::InMemoryBackend;
use super::traits::StorageBackend;

/// Build the backend named by `config`.
pub fn open_backend(config: &StorageConfig) -> LarderResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryBackend::new()),
        BackendKind::Fs => Arc::new(LocalDirBackend::new(&config.cache_dir)?),
        BackendKind::Lmdb => Arc::new(LmdbBackend::new(
            &config.cache_dir,
            config.lmdb_map_size_mb,
        )?),
    };
    tracing::debug!(backend = backend.name(), "Storage backend ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::StorageId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_each_backend() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let configs = [
            StorageConfig::memory(),
            StorageConfig::fs(temp_dir.path().join("fs")),
            StorageConfig::lmdb(temp_dir.path().join("lmdb"), 10),
        ];

        for config in &configs {
            let backend = open_backend(config).expect("backend should open");
            assert_eq!(backend.name(), config.backend.to_string());

            let id = StorageId::structured("probe").unwrap();
            backend.write(&id, b"{}", "application/json").await.unwrap();
            assert!(backend.exists(&id).await.unwrap());
        }
    }
}
