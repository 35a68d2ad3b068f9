//! Error types for the downloader service.

use std::path::PathBuf;

use grib_inventory::FetchError;
use thiserror::Error;

/// Errors that can occur while running download jobs.
///
/// Index parse failures never reach this type; they are absorbed by the
/// inventory builder and only show up as an incomplete inventory.
#[derive(Error, Debug)]
pub enum DownloaderError {
    /// Invalid or missing settings. Aborts the run before any job starts.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Transport failure that survived the retry budget.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Local filesystem failure. Fatal for the job it happens in.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The geographic subset tool failed or could not be started.
    #[error("Subset of {} failed: {message}", .path.display())]
    Subset { path: PathBuf, message: String },
}

impl DownloaderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloaderError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for downloader operations.
pub type Result<T> = std::result::Result<T, DownloaderError>;
