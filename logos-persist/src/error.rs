//! Error taxonomy for the persistence engine.
//!
//! | Fault                | Type             | Scope during drain | Scope during restore |
//! |----------------------|------------------|--------------------|----------------------|
//! | Backend list/read/write | `StorageError` | logged, key skipped | list aborts, read → null |
//! | Malformed payload    | `SerializeError` | logged, key skipped | key → null           |
//! | Transform failure    | `TransformError` | logged, key skipped | key → null           |
//! | Serial + async       | `Configuration`  | —                  | fails before any work |

use thiserror::Error;

/// Storage backend faults.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored value could not be encoded or decoded by the backend itself.
    #[error("storage codec error: {0}")]
    Codec(String),
    /// The backend has been shut down.
    #[error("storage is closed")]
    Closed,
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Serialization faults raised by a [`crate::serialize::Serializer`].
#[derive(Debug, Clone, Error)]
pub enum SerializeError {
    /// Value could not be encoded.
    #[error("failed to encode value: {0}")]
    Encode(String),
    /// Stored payload is malformed.
    #[error("failed to decode stored payload: {0}")]
    Decode(String),
    /// Stored payload was expected to be serialized text.
    #[error("stored payload is not serialized text")]
    NotText,
    /// Value nests deeper than the serializer accepts.
    ///
    /// Owned value trees cannot form reference cycles, so runaway nesting is
    /// the failure this guard reports instead.
    #[error("value nests deeper than {limit} levels at `{path}`")]
    TooDeep { path: String, limit: usize },
}

/// A transform stage failed for one key.
#[derive(Debug, Clone, Error)]
#[error("transform failed for key `{key}`: {message}")]
pub struct TransformError {
    pub key: String,
    pub message: String,
}

impl TransformError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Top-level engine error.
#[derive(Debug, Clone, Error)]
pub enum PersistError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Invalid combination of options, detected before any per-key work.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The persistor needs a tokio runtime to schedule writes.
    #[error("no tokio runtime available to drive the write scheduler")]
    NoRuntime,
}

pub type PersistResult<T> = Result<T, PersistError>;
