//! Configuration loading for reforecast downloads.
//!
//! One YAML file describes the archive (version, file templates, member
//! types), the output layout, transfer tuning, the date range and the
//! parameters to fetch. Settings are validated once at startup and then
//! shared read-only.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use grib_inventory::{SelectionCriteria, SourceLocation};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{DownloaderError, Result};
use crate::job::TransferSettings;
use crate::template::{self, Placeholders};

const REFORECAST_V2_YAML: &str = include_str!("../config/reforecast-v2.yaml");
const GEFS_V12_YAML: &str = include_str!("../config/gefs-v12.yaml");

/// Archive generation. Decides the file layout and which member types exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum ArchiveVersion {
    /// Second-generation reforecast: one file per parameter, ensemble
    /// statistics available as separate types.
    V2,
    /// GEFS v12 reforecast: each parameter split over several lead-time
    /// files, members only.
    V12,
}

impl ArchiveVersion {
    pub fn number(self) -> u8 {
        match self {
            ArchiveVersion::V2 => 2,
            ArchiveVersion::V12 => 12,
        }
    }

    fn default_index_suffix(self) -> &'static str {
        match self {
            ArchiveVersion::V2 => ".inv",
            ArchiveVersion::V12 => ".idx",
        }
    }
}

impl TryFrom<u8> for ArchiveVersion {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            2 => Ok(ArchiveVersion::V2),
            12 => Ok(ArchiveVersion::V12),
            other => Err(format!("unsupported archive version {} (expected 2 or 12)", other)),
        }
    }
}

impl fmt::Display for ArchiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloaderConfig {
    pub version: ArchiveVersion,
    pub source: SourceConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
}

/// Where the archive lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub base_url: String,
    /// File templates relative to `base_url`, one per source location.
    /// Their order is the order ranges are written to the output.
    pub files: Vec<String>,
    /// Defaults to `.inv` for version 2 and `.idx` for version 12
    #[serde(default)]
    pub index_suffix: Option<String>,
    /// Types fetched for parameters with `members: true`
    #[serde(default)]
    pub member_types: Vec<String>,
    /// Types fetched for parameters with `members: false` (version 2 only)
    #[serde(default)]
    pub statistic_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Output path template
    pub template: String,
    #[serde(default)]
    pub subset: Option<SubsetBox>,
}

/// Geographic box handed to the subset tool.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubsetBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl SubsetBox {
    /// `"lon_min:lon_max"` with two decimals
    pub fn lon_arg(&self) -> String {
        format!("{:.2}:{:.2}", self.lon_min, self.lon_max)
    }

    /// `"lat_min:lat_max"` with two decimals
    pub fn lat_arg(&self) -> String {
        format!("{:.2}:{:.2}", self.lat_min, self.lat_max)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    /// Extra attempts per source group after the first one
    #[serde(default)]
    pub retries: u32,
    /// TCP connect timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Whole-request timeout in seconds, applied per ranged request
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Pause after a failed attempt
    #[serde(default)]
    pub backoff_secs: f64,
    #[serde(skip)]
    backoff: Duration,
    /// Append one line per transfer attempt to this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_subset_program")]
    pub subset_program: PathBuf,
}

fn default_subset_program() -> PathBuf {
    PathBuf::from("wgrib2")
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    if value < 0.0 {
        return Err(DownloaderError::Config(format!("{} must not be negative", field)));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| DownloaderError::Config(format!("{} = {}: {}", field, value, e)))
}

fn timeout(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|&s| s > 0).map(Duration::from_secs)
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout_secs: None,
            request_timeout_secs: None,
            backoff_secs: 0.0,
            backoff: Duration::ZERO,
            log_file: None,
            subset_program: default_subset_program(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// First run date (inclusive)
    #[serde(default)]
    pub from: Option<NaiveDate>,
    /// Last run date (exclusive)
    #[serde(default)]
    pub to: Option<NaiveDate>,
    /// Restrict the date range to one calendar month (1..=12)
    #[serde(default)]
    pub only_month: Option<u32>,
    /// Pause after every job that transferred data
    #[serde(default)]
    pub sleep_secs: f64,
    #[serde(skip)]
    pacing: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionConfig {
    /// Lead times to keep; absent or empty keeps all
    #[serde(default)]
    pub steps: Option<Vec<u32>>,
}

/// One parameter to download.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterConfig {
    pub name: String,
    /// Fetch individual members instead of ensemble statistics
    #[serde(default)]
    pub members: bool,
    /// Pressure levels in hPa; absent or empty keeps all records
    #[serde(default)]
    pub levels: Option<Vec<u32>>,
}

impl DownloaderConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DownloaderError::io(path, e))?;
        let config = Self::from_yaml_str(&content).map_err(|e| match e {
            DownloaderError::Config(msg) => {
                DownloaderError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        debug!(path = %path.display(), version = %config.version, "Loaded config");
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut config: DownloaderConfig = serde_yaml::from_str(content)
            .map_err(|e| DownloaderError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in settings for an archive version, used when no file is given.
    pub fn builtin(version: ArchiveVersion) -> Result<Self> {
        match version {
            ArchiveVersion::V2 => Self::from_yaml_str(REFORECAST_V2_YAML),
            ArchiveVersion::V12 => Self::from_yaml_str(GEFS_V12_YAML),
        }
    }

    /// Check invariants and normalize the parsed settings.
    ///
    /// Empty level or step lists mean "no filter". Version 12 has no ensemble
    /// statistics, so `members: false` is turned into `members: true`.
    pub fn validate(&mut self) -> Result<()> {
        let invalid = |msg: String| Err(DownloaderError::Config(msg));

        if self.source.base_url.trim().is_empty() {
            return invalid("source.base_url must not be empty".into());
        }
        if self.source.files.is_empty() {
            return invalid("source.files must list at least one file template".into());
        }
        for file in &self.source.files {
            template::check(file)?;
        }
        template::check(&self.output.template)?;

        if !self.output.template.contains("<param>") {
            warn!(
                template = %self.output.template,
                "Output template has no <param> placeholder, parameters will overwrite each other's targets"
            );
        }

        if let Some(bbox) = &self.output.subset {
            if !(bbox.lon_min < bbox.lon_max && bbox.lat_min < bbox.lat_max) {
                return invalid(format!(
                    "output.subset bounds must be strictly increasing (lon {} lat {})",
                    bbox.lon_arg(),
                    bbox.lat_arg()
                ));
            }
        }

        self.transfer.backoff = seconds("transfer.backoff_secs", self.transfer.backoff_secs)?;
        self.schedule.pacing = seconds("schedule.sleep_secs", self.schedule.sleep_secs)?;
        if let Some(month) = self.schedule.only_month {
            if !(1..=12).contains(&month) {
                return invalid(format!("schedule.only_month must be 1..=12, got {}", month));
            }
        }
        if let (Some(from), Some(to)) = (self.schedule.from, self.schedule.to) {
            if from > to {
                return invalid(format!("schedule.from ({}) is after schedule.to ({})", from, to));
            }
        }

        if self.version == ArchiveVersion::V12 {
            if !self.source.statistic_types.is_empty() {
                warn!("Version 12 archives carry no ensemble statistics, ignoring statistic_types");
                self.source.statistic_types.clear();
            }
            for param in self.parameters.iter_mut().filter(|p| !p.members) {
                warn!(
                    param = %param.name,
                    "Version 12 archives only provide members, setting members to true"
                );
                param.members = true;
            }
        }

        if matches!(&self.selection.steps, Some(steps) if steps.is_empty()) {
            self.selection.steps = None;
        }
        for param in &mut self.parameters {
            if param.name.trim().is_empty() {
                return invalid("parameter names must not be empty".into());
            }
            if matches!(&param.levels, Some(levels) if levels.is_empty()) {
                param.levels = None;
            }
        }

        if self.parameters.is_empty() {
            return invalid("at least one parameter is required".into());
        }
        let mut seen = BTreeSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return invalid(format!("parameter {} is listed twice", param.name));
            }
            if self.types_for(param).is_empty() {
                return invalid(format!(
                    "parameter {} has no types to fetch (members: {})",
                    param.name, param.members
                ));
            }
        }

        Ok(())
    }

    pub fn index_suffix(&self) -> &str {
        self.source
            .index_suffix
            .as_deref()
            .unwrap_or_else(|| self.version.default_index_suffix())
    }

    /// Member or statistic types fetched for a parameter.
    pub fn types_for(&self, param: &ParameterConfig) -> &[String] {
        if param.members {
            &self.source.member_types
        } else {
            &self.source.statistic_types
        }
    }

    /// Remote files making up one job, in declaration order.
    pub fn source_locations(
        &self,
        date: NaiveDate,
        param: &str,
        member_type: &str,
    ) -> Result<Vec<SourceLocation>> {
        let values = self.placeholders(param, member_type);
        self.source
            .files
            .iter()
            .map(|file| {
                let path = template::render(file, date, values)?;
                Ok(SourceLocation::new(
                    template::join_url(&self.source.base_url, &path),
                    self.index_suffix(),
                ))
            })
            .collect()
    }

    /// Final output path of one job.
    pub fn output_path(&self, date: NaiveDate, param: &str, member_type: &str) -> Result<PathBuf> {
        template::render(
            &self.output.template,
            date,
            self.placeholders(param, member_type),
        )
        .map(PathBuf::from)
    }

    fn placeholders<'a>(&self, param: &'a str, member_type: &'a str) -> Placeholders<'a> {
        Placeholders {
            param,
            member_type,
            version: self.version.number(),
        }
    }

    /// Record filter for one parameter.
    pub fn selection_for(&self, param: &ParameterConfig) -> SelectionCriteria {
        let mut criteria = SelectionCriteria::all();
        if let Some(levels) = &param.levels {
            criteria = criteria.with_levels(levels.iter().copied());
        }
        if let Some(steps) = &self.selection.steps {
            criteria = criteria.with_steps(steps.iter().copied());
        }
        criteria
    }

    /// Run dates of the configured schedule, `from` inclusive, `to` exclusive.
    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        let (from, to) = match (self.schedule.from, self.schedule.to) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                return Err(DownloaderError::Config(
                    "schedule.from and schedule.to are required for bulk downloads".into(),
                ))
            }
        };

        let mut dates = Vec::new();
        let mut day = from;
        while day < to {
            if self.schedule.only_month.map_or(true, |m| day.month() == m) {
                dates.push(day);
            }
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(dates)
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            retries: self.transfer.retries,
            backoff: self.transfer.backoff,
            request_timeout: timeout(self.transfer.request_timeout_secs),
        }
    }

    /// Zero disables the timeout.
    pub fn connect_timeout(&self) -> Option<Duration> {
        timeout(self.transfer.timeout_secs)
    }

    pub fn pacing(&self) -> Duration {
        self.schedule.pacing
    }

    /// Log the effective settings.
    pub fn log_summary(&self) {
        info!(
            version = %self.version,
            base_url = %self.source.base_url,
            files = self.source.files.len(),
            index_suffix = %self.index_suffix(),
            output = %self.output.template,
            "Archive settings"
        );
        match &self.output.subset {
            Some(bbox) => info!(
                lon = %bbox.lon_arg(),
                lat = %bbox.lat_arg(),
                program = %self.transfer.subset_program.display(),
                "Subsetting enabled"
            ),
            None => info!("Subsetting disabled, archive messages are stored unchanged"),
        }
        info!(
            retries = self.transfer.retries,
            connect_timeout_secs = ?self.transfer.timeout_secs,
            request_timeout_secs = ?self.transfer.request_timeout_secs,
            backoff_secs = self.transfer.backoff_secs,
            log_file = ?self.transfer.log_file,
            "Transfer settings"
        );
        info!(
            from = ?self.schedule.from,
            to = ?self.schedule.to,
            only_month = ?self.schedule.only_month,
            sleep_secs = self.schedule.sleep_secs,
            steps = ?self.selection.steps,
            "Schedule"
        );
        for param in &self.parameters {
            info!(
                param = %param.name,
                members = param.members,
                levels = ?param.levels,
                types = ?self.types_for(param),
                "Parameter"
            );
        }
    }
}

/// Command-line overrides applied on top of a loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub members: bool,
    pub levels: Vec<u32>,
    pub steps: Vec<u32>,
    pub params: Vec<String>,
}

impl DownloaderConfig {
    /// Replace the parameter list with `overrides.params`.
    ///
    /// Levels and the members flag apply to every given parameter. Steps
    /// replace the configured selection when given.
    pub fn apply_overrides(&mut self, overrides: Overrides) -> Result<()> {
        let levels: BTreeSet<u32> = overrides.levels.into_iter().collect();
        let levels = (!levels.is_empty()).then(|| levels.into_iter().collect::<Vec<_>>());

        self.parameters = overrides
            .params
            .into_iter()
            .map(|name| ParameterConfig {
                name,
                members: overrides.members,
                levels: levels.clone(),
            })
            .collect();
        if !overrides.steps.is_empty() {
            self.selection.steps = Some(overrides.steps);
        }
        self.validate()
    }
}
