//! Moving a complete temp file into place, optionally through a subset tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SubsetBox;
use crate::error::{DownloaderError, Result};
use crate::job::{FetchJob, JobStatus};

/// Cuts a geographic box out of a GRIB file.
#[async_trait]
pub trait Subsetter: Send + Sync {
    async fn subset(&self, input: &Path, bbox: &SubsetBox, output: &Path) -> Result<()>;
}

/// Runs `wgrib2 <input> -small_grib <lon> <lat> <output>`.
pub struct Wgrib2 {
    program: PathBuf,
}

impl Wgrib2 {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Subsetter for Wgrib2 {
    async fn subset(&self, input: &Path, bbox: &SubsetBox, output: &Path) -> Result<()> {
        let result = Command::new(&self.program)
            .arg(input)
            .arg("-small_grib")
            .arg(bbox.lon_arg())
            .arg(bbox.lat_arg())
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DownloaderError::Subset {
                path: output.to_path_buf(),
                message: format!("could not run {}: {}", self.program.display(), e),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(DownloaderError::Subset {
                path: output.to_path_buf(),
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    result.status,
                    stderr.trim()
                ),
            });
        }

        debug!(
            program = %self.program.display(),
            stdout = %String::from_utf8_lossy(&result.stdout).trim(),
            "Subset finished"
        );
        Ok(())
    }
}

/// Produces a job's output from its temp file.
///
/// The output path only ever appears complete: either the temp file is
/// renamed, or the subset tool writes it and any partial result is removed
/// when the tool fails.
#[derive(Default)]
pub struct Finalizer<'a> {
    subset: Option<(&'a dyn Subsetter, SubsetBox)>,
}

impl<'a> Finalizer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subset(tool: &'a dyn Subsetter, bbox: SubsetBox) -> Self {
        Self {
            subset: Some((tool, bbox)),
        }
    }

    pub async fn finalize(&self, job: &mut FetchJob) -> Result<()> {
        let result = match &self.subset {
            Some((tool, bbox)) => subset_into_place(*tool, bbox, job).await,
            None => move_into_place(&job.temp_path, &job.output_path).await,
        };

        match &result {
            Ok(()) => job.set_status(JobStatus::Succeeded),
            Err(_) => job.set_status(JobStatus::Failed),
        }
        result
    }

    /// Remove what a failed job left behind. The output path is not touched.
    pub async fn discard(&self, job: &mut FetchJob) {
        remove_quietly(&job.temp_path).await;
        job.set_status(JobStatus::Failed);
    }
}

async fn subset_into_place(tool: &dyn Subsetter, bbox: &SubsetBox, job: &FetchJob) -> Result<()> {
    info!(
        lon = %bbox.lon_arg(),
        lat = %bbox.lat_arg(),
        output = %job.output_path.display(),
        "Subsetting"
    );

    let mut result = tool.subset(&job.temp_path, bbox, &job.output_path).await;
    if result.is_ok() && tokio::fs::metadata(&job.output_path).await.is_err() {
        result = Err(DownloaderError::Subset {
            path: job.output_path.clone(),
            message: "subset tool produced no output".to_string(),
        });
    }

    remove_quietly(&job.temp_path).await;
    if result.is_err() {
        remove_quietly(&job.output_path).await;
    }
    result
}

/// Atomic rename. The temp file lives next to its target, so both are on
/// the same filesystem and a crash never leaves a truncated output.
async fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| DownloaderError::io(to, e))
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove file"),
    }
}
