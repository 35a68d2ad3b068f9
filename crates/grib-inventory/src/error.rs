//! Error types for inventory handling.

use thiserror::Error;

/// Errors raised while decoding an index.
///
/// Any of these discards the contribution of the whole source location the
/// offending line belongs to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Malformed inventory line: {line:?}")]
    MalformedLine { line: String },

    #[error("Cannot decode forecast step {token:?} in line: {line:?}")]
    UndecodableStep { token: String, line: String },

    #[error("Message {message} starts at byte {start}, not after previous start {previous}")]
    OffsetNotAscending {
        message: u32,
        previous: u64,
        start: u64,
    },
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Transport failures while talking to the archive server.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timed out requesting {url}")]
    Timeout { url: String },

    #[error("Could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Failed reading response body from {url}: {message}")]
    Body { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Failed writing transfer data: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Short outcome code used in the transfer log (`error-<code>`).
    pub fn code(&self) -> String {
        match self {
            FetchError::Status { status, .. } => status.to_string(),
            FetchError::Timeout { .. } => "timeout".to_string(),
            FetchError::Connect { .. } => "connect".to_string(),
            FetchError::Body { .. } => "body".to_string(),
            FetchError::Request { .. } => "request".to_string(),
            FetchError::Io(_) => "io".to_string(),
        }
    }
}
