//! Fetch jobs: one output file assembled from ranged reads.
//!
//! A job writes the ranges of its [`RangePlan`] into a temporary file next
//! to the output, group by group. Every source group is retried as a unit:
//! a failed attempt truncates the temp file back to where the group started,
//! so a successful retry never leaves duplicate or partial messages behind.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use grib_inventory::{FetchError, RangePlan, SourceGroup};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{DownloaderError, Result};
use crate::metrics;
use crate::transfer_log::TransferLog;
use crate::transport::{RangeRequest, RangeTransport};

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Downloading,
    Succeeded,
    Failed,
}

/// What happened to one (date, parameter, type) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOutcome {
    /// Output already existed, nothing was requested
    SkippedExisting,
    /// A source location had no usable index
    InventoryUnavailable,
    /// The inventory had no record matching the selection
    NothingSelected,
    Succeeded,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::SkippedExisting => "skipped_existing",
            JobOutcome::InventoryUnavailable => "inventory_unavailable",
            JobOutcome::NothingSelected => "nothing_selected",
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
        }
    }

    /// The job got as far as requesting archive data.
    pub fn transferred_data(&self) -> bool {
        matches!(self, JobOutcome::Succeeded | JobOutcome::Failed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed | JobOutcome::InventoryUnavailable)
    }
}

/// Retry and timeout settings for range transfers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferSettings {
    /// Extra attempts per source group; a group is tried `retries + 1` times
    pub retries: u32,
    /// Pause after a failed attempt
    pub backoff: Duration,
    /// Per-request timeout
    pub request_timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct FetchJob {
    pub param: String,
    pub member_type: String,
    pub plan: RangePlan,
    pub output_path: PathBuf,
    pub temp_path: PathBuf,
    status: JobStatus,
}

impl FetchJob {
    pub fn new(
        param: impl Into<String>,
        member_type: impl Into<String>,
        plan: RangePlan,
        output_path: PathBuf,
    ) -> Self {
        Self {
            param: param.into(),
            member_type: member_type.into(),
            plan,
            temp_path: temp_path_for(&output_path),
            output_path,
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: JobStatus) {
        debug!(from = ?self.status, to = ?status, output = %self.output_path.display(), "Job status");
        self.status = status;
    }
}

/// `<output>.tmp`, in the output's directory.
pub fn temp_path_for(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes the ranges of a job into its temp file.
pub struct RangeDownloader<'a, T: ?Sized> {
    transport: &'a T,
    settings: TransferSettings,
    transfer_log: Option<&'a TransferLog>,
}

impl<'a, T: RangeTransport + ?Sized> RangeDownloader<'a, T> {
    pub fn new(transport: &'a T, settings: TransferSettings) -> Self {
        Self {
            transport,
            settings,
            transfer_log: None,
        }
    }

    pub fn with_transfer_log(mut self, transfer_log: Option<&'a TransferLog>) -> Self {
        self.transfer_log = transfer_log;
        self
    }

    /// Download every planned range into `job.temp_path`.
    ///
    /// Moves the job to `Downloading`, and to `Failed` on error. On success
    /// the job stays `Downloading` until it is finalized. Returns the number
    /// of bytes written.
    #[instrument(skip_all, fields(
        param = %job.param,
        member = %job.member_type,
        ranges = job.plan.range_count(),
    ))]
    pub async fn download(&self, job: &mut FetchJob) -> Result<u64> {
        job.set_status(JobStatus::Downloading);

        let result = self.write_plan(job).await;
        if result.is_err() {
            job.set_status(JobStatus::Failed);
        }
        result
    }

    async fn write_plan(&self, job: &FetchJob) -> Result<u64> {
        let temp_path = job.temp_path.as_path();
        if let Some(parent) = temp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloaderError::io(parent, e))?;
        }

        // truncate: a stale temp file from an interrupted run is never reused
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp_path)
            .await
            .map_err(|e| DownloaderError::io(temp_path, e))?;

        let job_started = Instant::now();
        let mut total = 0u64;
        for group in job.plan.groups() {
            total += self.write_group(group, &mut file, job, job_started).await?;
        }

        file.flush()
            .await
            .map_err(|e| DownloaderError::io(temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloaderError::io(temp_path, e))?;

        Ok(total)
    }

    /// Fetch one source group, retrying it as a whole.
    async fn write_group(
        &self,
        group: &SourceGroup,
        file: &mut File,
        job: &FetchJob,
        job_started: Instant,
    ) -> Result<u64> {
        let temp_path = job.temp_path.as_path();
        let group_start = file
            .stream_position()
            .await
            .map_err(|e| DownloaderError::io(temp_path, e))?;
        let attempts = self.settings.retries.saturating_add(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            info!(
                url = %group.location.data_url,
                ranges = group.ranges.len(),
                attempt = attempt,
                retries_left = attempts - attempt,
                "Requesting ranges"
            );

            let err = match self.fetch_group(group, file).await {
                Ok(bytes) => {
                    metrics::record_group_attempt(true);
                    metrics::record_bytes(bytes);
                    self.log_attempt(job_started.elapsed(), "success", job).await;
                    info!(
                        url = %group.location.data_url,
                        bytes = bytes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Source group complete"
                    );
                    return Ok(bytes);
                }
                // temp file write errors fail the job at once
                Err(FetchError::Io(e)) => return Err(DownloaderError::io(temp_path, e)),
                Err(e) => e,
            };

            metrics::record_group_attempt(false);
            self.log_attempt(job_started.elapsed(), &format!("error-{}", err.code()), job)
                .await;
            rollback(file, group_start)
                .await
                .map_err(|e| DownloaderError::io(temp_path, e))?;

            if attempt >= attempts {
                error!(
                    url = %group.location.data_url,
                    error = %err,
                    attempts = attempts,
                    "Source group failed, giving up"
                );
                return Err(err.into());
            }

            warn!(
                url = %group.location.data_url,
                error = %err,
                retries_left = attempts - attempt,
                backoff_secs = self.settings.backoff.as_secs_f64(),
                "Source group failed, retrying"
            );
            if !self.settings.backoff.is_zero() {
                tokio::time::sleep(self.settings.backoff).await;
            }
        }
    }

    async fn fetch_group(&self, group: &SourceGroup, file: &mut File) -> std::result::Result<u64, FetchError> {
        let mut bytes = 0u64;
        for range in &group.ranges {
            let request = RangeRequest {
                url: group.location.data_url.clone(),
                range: *range,
                timeout: self.settings.request_timeout,
            };
            debug!(range = %request.range, "Requesting range");
            let sink: &mut (dyn AsyncWrite + Unpin + Send) = &mut *file;
            bytes += self.transport.fetch_range(&request, sink).await?;
        }
        Ok(bytes)
    }

    async fn log_attempt(&self, elapsed: Duration, tag: &str, job: &FetchJob) {
        if let Some(log) = self.transfer_log {
            log.record(elapsed, tag, &job.output_path).await;
        }
    }
}

/// Drop everything written after `offset`.
async fn rollback(file: &mut File, offset: u64) -> std::io::Result<()> {
    file.flush().await?;
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use grib_inventory::{ByteEnd, ByteRange, IndexFetcher, SourceLocation};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Result of one scripted range request.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Step {
        Ok,
        /// Fail before writing anything
        Fail(u16),
        /// Write this many bytes, then drop the connection
        Truncate(u64),
    }

    /// In-memory archive. Range requests consume `script` front to back and
    /// succeed once it is exhausted.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub bodies: HashMap<String, Vec<u8>>,
        pub indexes: HashMap<String, String>,
        pub script: Mutex<VecDeque<Step>>,
        pub calls: Mutex<Vec<RangeRequest>>,
        pub index_calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
            self.bodies.insert(url.to_string(), body);
            self
        }

        pub fn with_index(mut self, url: &str, text: &str) -> Self {
            self.indexes.insert(url.to_string(), text.to_string());
            self
        }

        pub fn with_script(self, steps: impl IntoIterator<Item = Step>) -> Self {
            self.script.lock().unwrap().extend(steps);
            self
        }

        pub fn range_calls(&self) -> Vec<RangeRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len() + self.index_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RangeTransport for ScriptedTransport {
        async fn fetch_range(
            &self,
            request: &RangeRequest,
            sink: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> std::result::Result<u64, FetchError> {
            self.calls.lock().unwrap().push(request.clone());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok);

            let body = self.bodies.get(&request.url).ok_or_else(|| FetchError::Status {
                url: request.url.clone(),
                status: 404,
            })?;
            let end = match request.range.end {
                ByteEnd::Offset(end) => Some(end),
                ByteEnd::EndOfFile => None,
            };
            let slice = test_utils::body_slice(body, request.range.start, end);

            match step {
                Step::Ok => {
                    sink.write_all(&slice).await?;
                    Ok(slice.len() as u64)
                }
                Step::Fail(status) => Err(FetchError::Status {
                    url: request.url.clone(),
                    status,
                }),
                Step::Truncate(n) => {
                    let n = (n as usize).min(slice.len());
                    sink.write_all(&slice[..n]).await?;
                    Err(FetchError::Body {
                        url: request.url.clone(),
                        message: "connection reset".to_string(),
                    })
                }
            }
        }
    }

    #[async_trait]
    impl IndexFetcher for ScriptedTransport {
        async fn fetch_index(&self, url: &str) -> std::result::Result<String, FetchError> {
            self.index_calls.lock().unwrap().push(url.to_string());
            self.indexes.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    const NEAR: &str = "https://archive.example.com/near.grib2";
    const FAR: &str = "https://archive.example.com/far.grib2";

    fn group(url: &str, ranges: &[(u64, Option<u64>)]) -> SourceGroup {
        SourceGroup {
            location: Arc::new(SourceLocation::new(url, ".idx")),
            ranges: ranges
                .iter()
                .map(|&(start, end)| {
                    ByteRange::new(start, end.map_or(ByteEnd::EndOfFile, ByteEnd::Offset))
                })
                .collect(),
        }
    }

    fn two_group_plan() -> RangePlan {
        RangePlan::new(vec![
            group(NEAR, &[(0, Some(99)), (200, None)]),
            group(FAR, &[(50, Some(149))]),
        ])
    }

    fn expected_two_group_body() -> Vec<u8> {
        let near = test_utils::archive_body(300);
        let far = test_utils::archive_body(400);
        let mut out = test_utils::body_slice(&near, 0, Some(99));
        out.extend(test_utils::body_slice(&near, 200, None));
        out.extend(test_utils::body_slice(&far, 50, Some(149)));
        out
    }

    fn transport() -> ScriptedTransport {
        ScriptedTransport::default()
            .with_body(NEAR, test_utils::archive_body(300))
            .with_body(FAR, test_utils::archive_body(400))
    }

    fn settings(retries: u32) -> TransferSettings {
        TransferSettings {
            retries,
            ..Default::default()
        }
    }

    fn job_in(dir: &Path, plan: RangePlan) -> FetchJob {
        FetchJob::new("tmp_pres", "c00", plan, dir.join("2000/tmp_pres_c00.grib2"))
    }

    #[test]
    fn test_temp_path_sits_next_to_output() {
        assert_eq!(
            temp_path_for(Path::new("out/a.grib2")),
            PathBuf::from("out/a.grib2.tmp")
        );
    }

    #[test]
    fn test_outcome_classification() {
        assert!(JobOutcome::Failed.is_failure());
        assert!(JobOutcome::InventoryUnavailable.is_failure());
        assert!(!JobOutcome::NothingSelected.is_failure());
        assert!(!JobOutcome::SkippedExisting.transferred_data());
        assert!(JobOutcome::Failed.transferred_data());
    }

    #[tokio::test]
    async fn test_download_writes_groups_in_plan_order() {
        let dir = test_utils::temp_test_dir();
        let transport = transport();
        let mut job = job_in(dir.path(), two_group_plan());

        let bytes = RangeDownloader::new(&transport, settings(0))
            .download(&mut job)
            .await
            .unwrap();

        let written = std::fs::read(&job.temp_path).unwrap();
        assert_eq!(written, expected_two_group_body());
        assert_eq!(bytes, written.len() as u64);
        assert_eq!(job.status(), JobStatus::Downloading);
        assert!(!job.output_path.exists());

        let urls: Vec<String> = transport.range_calls().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec![NEAR, NEAR, FAR]);
    }

    #[tokio::test]
    async fn test_retry_after_partial_body_leaves_no_duplicates() {
        let dir = test_utils::temp_test_dir();
        // near range 1 ok, range 2 cut short, then near retried from scratch
        let transport = transport().with_script([Step::Ok, Step::Truncate(37)]);
        let mut job = job_in(dir.path(), two_group_plan());

        RangeDownloader::new(&transport, settings(2))
            .download(&mut job)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&job.temp_path).unwrap(), expected_two_group_body());
        let urls: Vec<String> = transport.range_calls().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec![NEAR, NEAR, NEAR, NEAR, FAR]);
    }

    #[tokio::test]
    async fn test_k_failures_below_budget_take_k_plus_one_attempts() {
        for k in 0..3usize {
            let dir = test_utils::temp_test_dir();
            let plan = RangePlan::new(vec![group(FAR, &[(0, Some(99))])]);
            let transport = transport().with_script(vec![Step::Fail(503); k]);
            let mut job = job_in(dir.path(), plan);

            RangeDownloader::new(&transport, settings(3))
                .download(&mut job)
                .await
                .unwrap();

            assert_eq!(transport.range_calls().len(), k + 1);
            assert_eq!(std::fs::read(&job.temp_path).unwrap().len(), 100);
        }
    }

    #[tokio::test]
    async fn test_budget_exhausted_fails_job() {
        let dir = test_utils::temp_test_dir();
        let plan = RangePlan::new(vec![group(FAR, &[(0, Some(99))])]);
        let transport = transport().with_script(vec![Step::Fail(503); 3]);
        let mut job = job_in(dir.path(), plan);

        let err = RangeDownloader::new(&transport, settings(2))
            .download(&mut job)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DownloaderError::Fetch(FetchError::Status { status: 503, .. })
        ));
        assert_eq!(transport.range_calls().len(), 3);
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(!job.output_path.exists());
    }

    #[tokio::test]
    async fn test_second_group_failure_fails_job_without_refetching_first() {
        let dir = test_utils::temp_test_dir();
        let transport = transport().with_script([
            Step::Ok,
            Step::Ok,
            Step::Truncate(10),
            Step::Fail(500),
        ]);
        let mut job = job_in(dir.path(), two_group_plan());

        let result = RangeDownloader::new(&transport, settings(1))
            .download(&mut job)
            .await;

        tokio_test::assert_err!(result);
        assert_eq!(job.status(), JobStatus::Failed);
        let urls: Vec<String> = transport.range_calls().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec![NEAR, NEAR, FAR, FAR]);
    }

    #[tokio::test]
    async fn test_stale_temp_file_is_truncated() {
        let dir = test_utils::temp_test_dir();
        let plan = RangePlan::new(vec![group(FAR, &[(0, Some(9))])]);
        let mut job = job_in(dir.path(), plan);
        std::fs::create_dir_all(job.temp_path.parent().unwrap()).unwrap();
        std::fs::write(&job.temp_path, vec![0xffu8; 4096]).unwrap();

        RangeDownloader::new(&transport(), settings(0))
            .download(&mut job)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(&job.temp_path).unwrap(),
            test_utils::body_slice(&test_utils::archive_body(400), 0, Some(9))
        );
    }

    #[tokio::test]
    async fn test_backoff_between_attempts() {
        let dir = test_utils::temp_test_dir();
        let plan = RangePlan::new(vec![group(FAR, &[(0, Some(9))])]);
        let transport = transport().with_script([Step::Fail(503), Step::Fail(503)]);
        let mut job = job_in(dir.path(), plan);
        let settings = TransferSettings {
            retries: 2,
            backoff: Duration::from_millis(40),
            request_timeout: None,
        };

        let started = Instant::now();
        RangeDownloader::new(&transport, settings)
            .download(&mut job)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_attempts_are_written_to_transfer_log() {
        let dir = test_utils::temp_test_dir();
        let log_path = dir.path().join("transfer.log");
        let log = TransferLog::open(&log_path).await.unwrap();
        let plan = RangePlan::new(vec![group(FAR, &[(0, Some(9))])]);
        let transport = transport().with_script([Step::Fail(503)]);
        let mut job = job_in(dir.path(), plan);

        RangeDownloader::new(&transport, settings(1))
            .with_transfer_log(Some(&log))
            .download(&mut job)
            .await
            .unwrap();

        let text = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("; error-503       ; "));
        assert!(lines[1].contains("; success         ; "));
        assert!(lines[1].ends_with("tmp_pres_c00.grib2"));
    }
}
