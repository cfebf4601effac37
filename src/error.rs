//! Error types for Tapedeck

use std::io;
use thiserror::Error;

/// Result type for Tapedeck operations
pub type Result<T> = std::result::Result<T, TapedeckError>;

/// Errors that can occur while loading, saving or configuring cassettes
#[derive(Debug, Error)]
pub enum TapedeckError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid cassette file format
    #[error("Invalid cassette format: {0}")]
    InvalidFormat(String),

    /// Cassette file corrupted (CRC mismatch)
    #[error("Cassette corrupted at offset {offset}: expected CRC {expected:#x}, got {actual:#x}")]
    CorruptedData {
        /// Offset where corruption was detected
        offset: u64,
        /// Expected CRC32 value
        expected: u32,
        /// Actual CRC32 value
        actual: u32,
    },

    /// Cassette file not found
    #[error("Cassette not found: {0}")]
    CassetteNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid cassette name
    #[error("Invalid cassette name: {0}")]
    InvalidCassetteName(String),

    /// The transport failed before any response was obtained
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Terminal failure of a single request task.
///
/// These never cross the task facade as a return value; they are delivered
/// through the task's completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A cassette is loaded but no unconsumed interaction matches the request
    #[error("no recorded interaction matches the request")]
    RequestNotFound,

    /// No cassette exists and the session is not allowed to record one
    #[error("cassette is missing and recording is disabled")]
    RecordingDisabled,

    /// The live transport produced no response to record
    #[error("cannot record, transport produced no response: {0}")]
    CannotRecordNoResponse(String),

    /// The session that created the task no longer exists
    #[error("session was dropped before the task resolved")]
    SessionClosed,

    /// The body of a download task could not be written to disk
    #[error("download could not be stored: {0}")]
    DownloadFailed(String),
}
