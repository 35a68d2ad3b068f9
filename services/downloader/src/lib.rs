//! Partial downloads of ensemble reforecast GRIB archives.
//!
//! For every run date, parameter and member type the downloader reads the
//! remote index files, selects the messages matching the configured levels
//! and lead times, and fetches only their byte ranges into one local GRIB
//! file. Modules are public so the binary and the integration tests share
//! them.

pub mod config;
pub mod error;
pub mod finalize;
pub mod job;
pub mod metrics;
pub mod runner;
pub mod template;
pub mod transfer_log;
pub mod transport;

pub use config::DownloaderConfig;
pub use error::{DownloaderError, Result};
pub use job::{FetchJob, JobOutcome, JobStatus};
pub use runner::{RunSummary, Runner};
