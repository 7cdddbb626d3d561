//! Shared error types for the services crate.

use thiserror::Error;

use review_core::model::{IdError, SessionStateError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by the question-generation client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("question generation is not configured")]
    Disabled,
    #[error("generation returned no questions")]
    Empty,
    #[error("generation request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("generation response could not be parsed: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Rate limits, upstream outages, and transport failures qualify for a
    /// bounded backoff retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::HttpStatus(status) => {
                status.as_u16() == 429 || status.is_server_error()
            }
            GenerationError::Http(_) => true,
            _ => false,
        }
    }
}

/// Errors emitted by the image renderer and queue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImageError {
    #[error("image rendering is not configured")]
    Disabled,
    #[error("render request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("rendered image is too small ({actual} bytes)")]
    TooSmall { actual: u64 },
    #[error("render response could not be parsed: {0}")]
    Malformed(String),
    #[error("image queue is closed")]
    QueueClosed,
}

/// Errors emitted by `BufferManager`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BufferError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SpawnEngine`.
///
/// Collaborator failures are absorbed into an empty outcome and never appear
/// here; only storage reads and invalid inputs do.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpawnError {
    #[error(transparent)]
    InvalidOrigin(#[from] IdError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SessionController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    State(#[from] SessionStateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Errors emitted while bootstrapping supply services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupplyInitError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
