use std::error::Error as StdError;

use thiserror::Error;

/// Boxed backend failure carried by [`StorageError::Backend`]
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum WatcherError {
    /// Construction-time failure, fatal to the one object being built
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse {kind} metadata for check id {id}: {source}")]
    Metadata {
        id: i64,
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown protocol kind {0}")]
    UnknownProtocol(i32),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WatcherError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("stored data is invalid: {0}")]
    InvalidData(String),

    #[error("storage backend failure: {0}")]
    Backend(#[source] BoxError),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    /// Whether retrying the same operation can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
