//! Error types for LARDER operations

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Storage layer errors.
///
/// A missing entry is never one of these: backends report absence as
/// `Ok(None)` from `read`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed for {id}: {reason}")]
    ReadFailed { id: String, reason: String },

    #[error("Write failed for {id}: {reason}")]
    WriteFailed { id: String, reason: String },

    #[error("Delete failed for {id}: {reason}")]
    DeleteFailed { id: String, reason: String },

    #[error("Invalid storage id {id}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors converting between stored bytes and a value representation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to decode {id} as {representation}: {reason}")]
    Decode {
        id: String,
        representation: String,
        reason: String,
    },

    #[error("Failed to encode value for {id}: {reason}")]
    Encode { id: String, reason: String },
}

/// Validation errors for caller input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cache key must not be empty")]
    EmptyKey,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown storage backend: {backend}")]
    UnknownBackend { backend: String },
}

/// The failure of a producer, carried through the cache untouched.
///
/// Displays exactly as the original error does. Use [`ProducerError::downcast_ref`]
/// to get the concrete error back.
#[derive(Clone)]
pub struct ProducerError {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl ProducerError {
    /// Wrap a concrete producer error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Wrap an already boxed error.
    pub fn from_boxed(error: Box<dyn StdError + Send + Sync + 'static>) -> Self {
        Self {
            inner: Arc::from(error),
        }
    }

    /// Wrap any producer error, passing an existing `ProducerError` through as is.
    pub fn wrap<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = Box::new(error);
        match boxed.downcast::<ProducerError>() {
            Ok(already) => *already,
            Err(other) => Self::from_boxed(other),
        }
    }

    /// Build a producer error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageError(message.into()))
    }

    /// Attempt to view the original error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        (*self.inner).downcast_ref::<E>()
    }

    /// Borrow the original error.
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl fmt::Debug for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProducerError").field(&self.inner).finish()
    }
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for ProducerError {
    /// The producer's own error.
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.inner)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

/// Master error type for all LARDER errors.
#[derive(Debug, Clone, Error)]
pub enum LarderError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LarderError {
    /// Returns the producer's error if this failure came from the producer.
    pub fn as_producer(&self) -> Option<&ProducerError> {
        match self {
            Self::Producer(err) => Some(err),
            _ => None,
        }
    }

    /// True when stored bytes could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Codec(CodecError::Decode { .. }))
    }

    /// True when the backend reported a fault.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for LARDER operations.
pub type LarderResult<T> = Result<T, LarderError>;

// =============================================================================
// TESTS
// =============================================================================
