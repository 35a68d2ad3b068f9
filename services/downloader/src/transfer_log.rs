//! Append-only transfer log, one line per group attempt.
//!
//! ```text
//!  2024-03-01 06:12:09;     14; success         ; data/tmp_pres_2000010100_c00.grib2
//!  2024-03-01 06:12:40;     31; error-timeout   ; data/tmp_pres_2000010100_p01.grib2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{DownloaderError, Result};

pub struct TransferLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl TransferLog {
    /// Open `path` for appending, creating it and its directory if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloaderError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| DownloaderError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one line. Write failures are logged and otherwise ignored.
    pub async fn record(&self, elapsed: Duration, tag: &str, target: &Path) {
        let line = format_line(Utc::now(), elapsed, tag, target);
        let mut file = self.file.lock().await;
        let result = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Could not write transfer log");
        }
    }
}

/// `" <UTC timestamp>; <elapsed seconds>; <tag>; <target>"`
pub fn format_line(at: DateTime<Utc>, elapsed: Duration, tag: &str, target: &Path) -> String {
    format!(
        " {}; {:>6}; {:<16}; {}\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        elapsed.as_secs(),
        tag,
        target.display()
    )
}
