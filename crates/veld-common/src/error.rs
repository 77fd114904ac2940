//! Error types shared across the Veld subsystems.

use crate::coords::ChunkCoord;
use thiserror::Error;

/// Errors from the persistence collaborators (chunk and player stores).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying IO failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded
    #[error("Serialization failed: {0}")]
    Serialize(String),

    /// Payload could not be decoded
    #[error("Deserialization failed: {0}")]
    Deserialize(String),

    /// File did not carry the expected magic bytes
    #[error("Invalid file format")]
    InvalidFormat,

    /// Schema version mismatch
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version found
        actual: String,
    },
}

/// Errors from world-state operations.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Persistence collaborator failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Chunk does not exist and creation is administratively disabled
    #[error("Chunk {coord} not present and chunk creation is disabled")]
    CreationDisabled {
        /// Coordinate of the missing chunk
        coord: ChunkCoord,
    },
}

/// Result type alias for world-state operations.
pub type WorldResult<T> = Result<T, WorldError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
