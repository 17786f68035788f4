//! Storage identifiers, stored entries and binary results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LarderResult, ValidationError};
use crate::media;

/// Suffix appended to the logical key of structured values.
pub const STRUCTURED_SUFFIX: &str = ".json";

/// How a cached value is represented in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    /// Serializable value, stored as formatted JSON text.
    #[default]
    Structured,
    /// Raw byte sequence with an associated media type.
    Binary,
}

impl Representation {
    /// Media type used when neither the caller nor storage supplies one.
    pub fn default_mime_type(self) -> &'static str {
        match self {
            Self::Structured => media::APPLICATION_JSON,
            Self::Binary => media::APPLICATION_OCTET_STREAM,
        }
    }

    /// Suffix that distinguishes this representation's storage id.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Structured => STRUCTURED_SUFFIX,
            Self::Binary => "",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical identifier a backend stores an entry under.
///
/// Built from the caller's logical key and the value's representation, so
/// the same logical key can hold a structured and a binary value side by side.
/// Renders as `<key>.json` for structured values and `<key>` for binary ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageId {
    key: String,
    representation: Representation,
}

impl StorageId {
    /// Create a storage id, rejecting empty keys.
    pub fn new(key: impl Into<String>, representation: Representation) -> LarderResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        Ok(Self {
            key,
            representation,
        })
    }

    pub fn structured(key: impl Into<String>) -> LarderResult<Self> {
        Self::new(key, Representation::Structured)
    }

    pub fn binary(key: impl Into<String>) -> LarderResult<Self> {
        Self::new(key, Representation::Binary)
    }

    /// Both ids a logical key may occupy.
    pub fn all_for(key: &str) -> LarderResult<[Self; 2]> {
        Ok([Self::structured(key)?, Self::binary(key)?])
    }

    /// The caller's logical key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn is_binary(&self) -> bool {
        self.representation == Representation::Binary
    }

    /// The physical name: logical key plus representation suffix.
    pub fn physical(&self) -> String {
        format!("{}{}", self.key, self.representation.suffix())
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.key, self.representation.suffix())
    }
}

/// What a backend persists and returns for one storage id.
///
/// `last_modified` is stamped by the backend at write time, never by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub payload: Vec<u8>,
    pub mime_type: String,
    pub last_modified: DateTime<Utc>,
}

impl StoredEntry {
    pub fn new(payload: Vec<u8>, mime_type: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            payload,
            mime_type: mime_type.into(),
            last_modified,
        }
    }

    /// Age of the entry relative to `now`, zero if written in the future.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        now.signed_duration_since(self.last_modified)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Binary payload bundled with its media type and a file-extension hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryResult {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_extension: Option<String>,
}

impl BinaryResult {
    /// Bundle bytes with a media type, deriving the extension from the registry.
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let file_extension = media::extension_for(&mime_type).map(str::to_string);
        Self {
            data,
            mime_type,
            file_extension,
        }
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LarderError;

    #[test]
    fn test_storage_id_suffixes() {
        let structured = StorageId::structured("reports/q3").unwrap();
        let binary = StorageId::binary("reports/q3").unwrap();

        assert_eq!(structured.to_string(), "reports/q3.json");
        assert_eq!(binary.to_string(), "reports/q3");
        assert_eq!(structured.physical(), structured.to_string());
        assert_ne!(structured, binary);
        assert_eq!(structured.key(), binary.key());
    }

    #[test]
    fn test_storage_id_rejects_empty_key() {
        let err = StorageId::binary("").unwrap_err();
        assert!(matches!(
            err,
            LarderError::Validation(ValidationError::EmptyKey)
        ));
    }

    #[test]
    fn test_all_for_covers_both_representations() {
        let ids = StorageId::all_for("t").unwrap();
        assert_eq!(ids[0].representation(), Representation::Structured);
        assert_eq!(ids[1].representation(), Representation::Binary);
    }

    #[test]
    fn test_representation_defaults() {
        assert_eq!(Representation::default(), Representation::Structured);
        assert_eq!(
            Representation::Structured.default_mime_type(),
            "application/json"
        );
        assert_eq!(
            Representation::Binary.default_mime_type(),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_binary_result_extension() {
        let png = BinaryResult::new(vec![1, 2, 3], "image/png");
        assert_eq!(png.file_extension.as_deref(), Some("png"));

        let raw = BinaryResult::new(vec![], "application/octet-stream");
        assert_eq!(raw.file_extension, None);
    }

    #[test]
    fn test_entry_age_never_negative() {
        let now = Utc::now();
        let future = StoredEntry::new(vec![], "text/plain", now + chrono::Duration::seconds(5));
        assert_eq!(future.age(now), std::time::Duration::ZERO);

        let past = StoredEntry::new(vec![], "text/plain", now - chrono::Duration::seconds(5));
        assert_eq!(past.age(now), std::time::Duration::from_secs(5));
    }
}
