//! Run loop: every date, parameter and member type, one job at a time.

use std::time::Instant;

use chrono::NaiveDate;
use grib_inventory::{IndexFetcher, InventoryBuilder};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DownloaderConfig, ParameterConfig};
use crate::error::Result;
use crate::finalize::{Finalizer, Subsetter};
use crate::job::{FetchJob, JobOutcome, RangeDownloader};
use crate::metrics;
use crate::transfer_log::TransferLog;
use crate::transport::RangeTransport;

/// Job counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub inventory_unavailable: usize,
    pub skipped_existing: usize,
    pub nothing_selected: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Succeeded => &mut self.succeeded,
            JobOutcome::Failed => &mut self.failed,
            JobOutcome::InventoryUnavailable => &mut self.inventory_unavailable,
            JobOutcome::SkippedExisting => &mut self.skipped_existing,
            JobOutcome::NothingSelected => &mut self.nothing_selected,
        };
        *counter += 1;
    }

    pub fn total(&self) -> usize {
        self.succeeded
            + self.failed
            + self.inventory_unavailable
            + self.skipped_existing
            + self.nothing_selected
    }

    /// Jobs that produced no output although data was expected.
    pub fn failures(&self) -> usize {
        self.failed + self.inventory_unavailable
    }

    pub fn has_failures(&self) -> bool {
        self.failures() > 0
    }

    pub fn log(&self) {
        info!(
            total = self.total(),
            succeeded = self.succeeded,
            failed = self.failed,
            inventory_unavailable = self.inventory_unavailable,
            skipped_existing = self.skipped_existing,
            nothing_selected = self.nothing_selected,
            "Run finished"
        );
    }
}

/// Drives download jobs strictly one after another.
pub struct Runner<'a, T: ?Sized> {
    config: &'a DownloaderConfig,
    transport: &'a T,
    subsetter: Option<&'a dyn Subsetter>,
    transfer_log: Option<&'a TransferLog>,
}

impl<'a, T: RangeTransport + IndexFetcher + ?Sized> Runner<'a, T> {
    pub fn new(config: &'a DownloaderConfig, transport: &'a T) -> Self {
        Self {
            config,
            transport,
            subsetter: None,
            transfer_log: None,
        }
    }

    /// Tool used when the config asks for a geographic subset.
    pub fn with_subsetter(mut self, subsetter: Option<&'a dyn Subsetter>) -> Self {
        self.subsetter = subsetter;
        self
    }

    pub fn with_transfer_log(mut self, transfer_log: Option<&'a TransferLog>) -> Self {
        self.transfer_log = transfer_log;
        self
    }

    /// Process all jobs of the given dates in order.
    ///
    /// Job failures are counted, never propagated. After every job that
    /// requested archive data the loop pauses for the configured pacing.
    pub async fn run(&self, dates: &[NaiveDate]) -> RunSummary {
        let mut summary = RunSummary::default();
        let pacing = self.config.pacing();

        for &date in dates {
            info!(date = %date, "Processing run date");

            for param in &self.config.parameters {
                for member_type in self.config.types_for(param) {
                    let started = Instant::now();
                    let outcome = match self.run_job(date, param, member_type).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(
                                date = %date,
                                param = %param.name,
                                member = %member_type,
                                error = %e,
                                "Job could not start"
                            );
                            JobOutcome::Failed
                        }
                    };

                    metrics::record_job(outcome, started.elapsed());
                    summary.record(outcome);

                    if outcome.transferred_data() && !pacing.is_zero() {
                        debug!(secs = pacing.as_secs_f64(), "Pausing before next job");
                        tokio::time::sleep(pacing).await;
                    }
                }
            }
        }

        summary
    }

    /// One (date, parameter, type) job.
    ///
    /// Errors are only returned for problems before any range was requested;
    /// transfer and finalize failures come back as `JobOutcome::Failed`.
    #[instrument(skip(self, param), fields(param = %param.name))]
    pub async fn run_job(
        &self,
        date: NaiveDate,
        param: &ParameterConfig,
        member_type: &str,
    ) -> Result<JobOutcome> {
        let output_path = self.config.output_path(date, &param.name, member_type)?;
        if output_path.exists() {
            info!(path = %output_path.display(), "File exists, skip download");
            return Ok(JobOutcome::SkippedExisting);
        }

        let locations = self
            .config
            .source_locations(date, &param.name, member_type)?;
        let report = InventoryBuilder::new(self.transport).build(&locations).await;
        if !report.is_complete() {
            for empty in &report.empty_sources {
                warn!(url = %empty.location.index_url, reason = %empty.reason, "Source unavailable");
            }
            warn!(
                path = %output_path.display(),
                "Inventory incomplete, skip this file"
            );
            return Ok(JobOutcome::InventoryUnavailable);
        }

        let selected = report.inventory.select(&self.config.selection_for(param));
        if selected.is_empty() {
            info!(
                records = report.inventory.len(),
                "No record matches the selection, skip this file"
            );
            return Ok(JobOutcome::NothingSelected);
        }
        for entry in &selected {
            debug!("   GET {}", entry);
        }

        let mut job = FetchJob::new(
            param.name.as_str(),
            member_type,
            selected.range_plan(),
            output_path,
        );
        info!(
            sources = job.plan.groups().len(),
            ranges = job.plan.range_count(),
            output = %job.output_path.display(),
            "Downloading"
        );

        let downloader = RangeDownloader::new(self.transport, self.config.transfer_settings())
            .with_transfer_log(self.transfer_log);
        let finalizer = match (self.subsetter, self.config.output.subset) {
            (Some(tool), Some(bbox)) => Finalizer::with_subset(tool, bbox),
            (None, Some(_)) => {
                warn!("Subset requested but no subset tool configured, storing full messages");
                Finalizer::new()
            }
            _ => Finalizer::new(),
        };

        let result = match downloader.download(&mut job).await {
            Ok(bytes) => finalizer.finalize(&mut job).await.map(|()| bytes),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                info!(path = %job.output_path.display(), bytes = bytes, "Download complete");
                Ok(JobOutcome::Succeeded)
            }
            Err(e) => {
                error!(path = %job.output_path.display(), error = %e, "Download failed");
                finalizer.discard(&mut job).await;
                Ok(JobOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::{ScriptedTransport, Step};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use test_utils::fixtures;

    const BASE: &str = "https://archive.example.com/gefs";

    fn config(out_dir: &Path, retries: u32) -> DownloaderConfig {
        let yaml = format!(
            r#"
version: 12
source:
  base_url: "{base}"
  files:
    - "%Y%m%d/<type>/near/<param>.grib2"
    - "%Y%m%d/<type>/far/<param>.grib2"
  member_types: [c00, p01]
output:
  template: "{out}/%Y%m%d/<param>_<type>.grib2"
transfer:
  retries: {retries}
selection:
  steps: [6, 246]
parameters:
  - name: apcp_sfc
    members: true
"#,
            base = BASE,
            out = out_dir.display(),
            retries = retries,
        );
        DownloaderConfig::from_yaml_str(&yaml).unwrap()
    }

    fn url(date: &str, member: &str, part: &str) -> String {
        format!("{}/{}/{}/{}/apcp_sfc.grib2", BASE, date, member, part)
    }

    /// Indexes and bodies for both members of one date.
    fn archive(date: &str) -> ScriptedTransport {
        let mut transport = ScriptedTransport::default();
        for member in ["c00", "p01"] {
            transport = transport
                .with_index(&format!("{}.idx", url(date, member, "near")), fixtures::GEFS_V12_NEAR_IDX)
                .with_index(&format!("{}.idx", url(date, member, "far")), fixtures::GEFS_V12_FAR_IDX)
                .with_body(&url(date, member, "near"), test_utils::archive_body(160_000))
                .with_body(&url(date, member, "far"), test_utils::archive_body(80_000));
        }
        transport
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, d).unwrap()
    }

    #[tokio::test]
    async fn test_run_downloads_every_member() {
        let dir = test_utils::temp_test_dir();
        let config = config(dir.path(), 0);
        let transport = archive("20000101");

        let summary = Runner::new(&config, &transport).run(&[day(1)]).await;

        assert_eq!(summary.succeeded, 2);
        assert!(!summary.has_failures());
        assert_eq!(
            test_utils::list_files(dir.path()),
            vec![
                PathBuf::from("20000101/apcp_sfc_c00.grib2"),
                PathBuf::from("20000101/apcp_sfc_p01.grib2"),
            ]
        );

        // step 6 from the near file, step 246 from the far file
        let near = test_utils::archive_body(160_000);
        let far = test_utils::archive_body(80_000);
        let mut expected = test_utils::body_slice(&near, 41017, Some(80410));
        expected.extend(test_utils::body_slice(&far, 0, Some(39807)));
        let written = std::fs::read(dir.path().join("20000101/apcp_sfc_c00.grib2")).unwrap();
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn test_existing_output_makes_no_network_calls() {
        let dir = test_utils::temp_test_dir();
        let config = config(dir.path(), 0);
        let transport = archive("20000101");
        for member in ["c00", "p01"] {
            let path = config.output_path(day(1), "apcp_sfc", member).unwrap();
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"already here").unwrap();
        }

        let summary = Runner::new(&config, &transport).run(&[day(1)]).await;

        assert_eq!(summary.skipped_existing, 2);
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_index_skips_job_as_unavailable() {
        let dir = test_utils::temp_test_dir();
        let config = config(dir.path(), 0);
        // the p01 far index is missing
        let mut transport = archive("20000101");
        transport
            .indexes
            .remove(&format!("{}.idx", url("20000101", "p01", "far")));

        let summary = Runner::new(&config, &transport).run(&[day(1)]).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.inventory_unavailable, 1);
        assert!(summary.has_failures());
        assert!(transport
            .range_calls()
            .iter()
            .all(|r| !r.url.contains("/p01/")));
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_the_run() {
        let dir = test_utils::temp_test_dir();
        let config = config(dir.path(), 1);
        let transport = archive("20000101").with_script([
            Step::Ok,
            Step::Fail(503),
            Step::Fail(503),
        ]);

        let summary = Runner::new(&config, &transport).run(&[day(1)]).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        // no temp file and no partial output for the failed member
        assert_eq!(
            test_utils::list_files(dir.path()),
            vec![PathBuf::from("20000101/apcp_sfc_p01.grib2")]
        );
    }

    #[tokio::test]
    async fn test_nothing_selected_is_not_a_failure() {
        let dir = test_utils::temp_test_dir();
        let mut config = config(dir.path(), 0);
        config.selection.steps = Some(vec![999]);
        let transport = archive("20000101");

        let summary = Runner::new(&config, &transport).run(&[day(1)]).await;

        assert_eq!(summary.nothing_selected, 2);
        assert!(!summary.has_failures());
        assert!(transport.range_calls().is_empty());
    }

    fn paced(mut config: DownloaderConfig, secs: f64) -> DownloaderConfig {
        config.schedule.sleep_secs = secs;
        config.validate().unwrap();
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_follows_jobs_that_transferred_data() {
        let dir = test_utils::temp_test_dir();
        let config = paced(config(dir.path(), 1), 30.0);
        // c00 fails on its far group, p01 succeeds
        let transport = archive("20000101").with_script([
            Step::Ok,
            Step::Fail(503),
            Step::Fail(503),
        ]);

        let started = tokio::time::Instant::now();
        let summary = Runner::new(&config, &transport).run(&[day(1)]).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(started.elapsed(), config.pacing() * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pacing_without_transfers() {
        let dir = test_utils::temp_test_dir();
        let existing = paced(config(dir.path(), 0), 30.0);
        let transport = archive("20000101");
        for member in ["c00", "p01"] {
            let path = existing.output_path(day(1), "apcp_sfc", member).unwrap();
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"already here").unwrap();
        }

        let started = tokio::time::Instant::now();
        let summary = Runner::new(&existing, &transport).run(&[day(1)]).await;
        assert_eq!(summary.skipped_existing, 2);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let other = test_utils::temp_test_dir();
        let mut unselected = paced(config(other.path(), 0), 30.0);
        unselected.selection.steps = Some(vec![999]);
        let mut transport = archive("20000102");
        transport
            .indexes
            .remove(&format!("{}.idx", url("20000102", "p01", "far")));

        let started = tokio::time::Instant::now();
        let summary = Runner::new(&unselected, &transport).run(&[day(2)]).await;
        assert_eq!(summary.nothing_selected, 1);
        assert_eq!(summary.inventory_unavailable, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        for outcome in [
            JobOutcome::Succeeded,
            JobOutcome::Succeeded,
            JobOutcome::Failed,
            JobOutcome::SkippedExisting,
            JobOutcome::InventoryUnavailable,
        ] {
            summary.record(outcome);
        }
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.failures(), 2);
    }
}
