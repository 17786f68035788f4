//! Configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, LarderResult};

/// Default root directory for on-disk backends.
pub const DEFAULT_CACHE_DIR: &str = "./.larder";

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 64;

/// Which storage backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local map; contents vanish with the process.
    #[default]
    Memory,
    /// One file per entry under a local directory.
    Fs,
    /// Single LMDB environment under a local directory.
    Lmdb,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "fs" | "file" | "filesystem" => Ok(Self::Fs),
            "lmdb" => Ok(Self::Lmdb),
            other => Err(ConfigError::UnknownBackend {
                backend: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Fs => "fs",
            Self::Lmdb => "lmdb",
        };
        f.write_str(name)
    }
}

/// Backend construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory for `fs` and `lmdb`.
    pub cache_dir: PathBuf,
    pub lmdb_map_size_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
        }
    }
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn fs(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Fs,
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn lmdb(cache_dir: impl Into<PathBuf>, map_size_mb: usize) -> Self {
        Self {
            backend: BackendKind::Lmdb,
            cache_dir: cache_dir.into(),
            lmdb_map_size_mb: map_size_mb,
        }
    }
}

/// Master configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LarderConfig {
    pub storage: StorageConfig,
    /// Default staleness window for options built with `CacheOptions::from_config`.
    pub default_stale_after: Option<Duration>,
    pub return_stale_on_error: bool,
    /// Serialize concurrent regenerations of the same key in-process.
    pub single_flight: bool,
}

impl LarderConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LARDER_BACKEND`: `memory`, `fs` or `lmdb` (default: memory)
    /// - `LARDER_CACHE_DIR`: root for on-disk backends (default: ./.larder)
    /// - `LARDER_LMDB_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `LARDER_DEFAULT_STALE_AFTER_SECS`: default staleness window (default: unset)
    /// - `LARDER_RETURN_STALE_ON_ERROR`: default fallback policy (default: false)
    /// - `LARDER_SINGLE_FLIGHT`: enable per-key single-flight (default: false)
    pub fn from_env() -> LarderResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> LarderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = StorageConfig::default();

        let backend = match lookup("LARDER_BACKEND") {
            Some(value) => value.parse::<BackendKind>()?,
            None => defaults.backend,
        };

        let cache_dir = lookup("LARDER_CACHE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let lmdb_map_size_mb = match lookup("LARDER_LMDB_MAP_SIZE_MB") {
            Some(value) => parse_field("LARDER_LMDB_MAP_SIZE_MB", &value)?,
            None => defaults.lmdb_map_size_mb,
        };

        let default_stale_after = match lookup("LARDER_DEFAULT_STALE_AFTER_SECS") {
            Some(value) => Some(Duration::from_secs(parse_field(
                "LARDER_DEFAULT_STALE_AFTER_SECS",
                &value,
            )?)),
            None => None,
        };

        let return_stale_on_error = lookup("LARDER_RETURN_STALE_ON_ERROR")
            .map(|s| parse_flag(&s))
            .unwrap_or(false);

        let single_flight = lookup("LARDER_SINGLE_FLIGHT")
            .map(|s| parse_flag(&s))
            .unwrap_or(false);

        let config = Self {
            storage: StorageConfig {
                backend,
                cache_dir,
                lmdb_map_size_mb,
            },
            default_stale_after,
            return_stale_on_error,
            single_flight,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations no backend can work with.
    pub fn validate(&self) -> LarderResult<()> {
        if self.storage.backend == BackendKind::Lmdb && self.storage.lmdb_map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lmdb_map_size_mb".to_string(),
                value: "0".to_string(),
                reason: "map size must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LarderError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = LarderConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, LarderConfig::default());
        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.storage.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
    }

    #[test]
    fn test_reads_all_variables() {
        let config = LarderConfig::from_lookup(lookup_from(&[
            ("LARDER_BACKEND", "lmdb"),
            ("LARDER_CACHE_DIR", "/var/cache/larder"),
            ("LARDER_LMDB_MAP_SIZE_MB", "256"),
            ("LARDER_DEFAULT_STALE_AFTER_SECS", "600"),
            ("LARDER_RETURN_STALE_ON_ERROR", "true"),
            ("LARDER_SINGLE_FLIGHT", "1"),
        ]))
        .unwrap();

        assert_eq!(config.storage, StorageConfig::lmdb("/var/cache/larder", 256));
        assert_eq!(config.default_stale_after, Some(Duration::from_secs(600)));
        assert!(config.return_stale_on_error);
        assert!(config.single_flight);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = LarderConfig::from_lookup(lookup_from(&[("LARDER_BACKEND", "s3")])).unwrap_err();
        assert!(matches!(
            err,
            LarderError::Config(ConfigError::UnknownBackend { .. })
        ));
    }

    #[test]
    fn test_bad_number_is_rejected() {
        let err = LarderConfig::from_lookup(lookup_from(&[(
            "LARDER_DEFAULT_STALE_AFTER_SECS",
            "-5",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("LARDER_DEFAULT_STALE_AFTER_SECS"));
    }

    #[test]
    fn test_zero_lmdb_map_size_fails_validation() {
        let err = LarderConfig::from_lookup(lookup_from(&[
            ("LARDER_BACKEND", "lmdb"),
            ("LARDER_LMDB_MAP_SIZE_MB", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, LarderError::Config(_)));
    }

    #[test]
    fn test_backend_kind_parse_and_display() {
        assert_eq!("FS".parse::<BackendKind>().unwrap(), BackendKind::Fs);
        assert_eq!(BackendKind::Lmdb.to_string(), "lmdb");
    }
}
