//! Index line decoding.
//!
//! One line of a GRIB index describes one message of the archive file:
//!
//! ```text
//! 12:4837210:d=2000010100:TMP:700 mb:6 hour fcst:ENS=+1
//! │  │       │            │   │      └ step descriptor (and anything after it)
//! │  │       │            │   └ level descriptor
//! │  │       │            └ parameter code
//! │  │       └ reference date
//! │  └ byte offset of the message
//! └ message number
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{InventoryError, Result};

/// A remote archive file together with the URL of its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub data_url: String,
    pub index_url: String,
}

impl SourceLocation {
    /// Index lives next to the data file, e.g. `foo.grib2` + `.idx`.
    pub fn new(data_url: impl Into<String>, index_suffix: &str) -> Self {
        let data_url = data_url.into();
        let index_url = format!("{}{}", data_url, index_suffix);
        Self {
            data_url,
            index_url,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data_url)
    }
}

/// Vertical level of a record, decoded once from the level descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelKind {
    /// Anything that is not an isobaric level (surface, 2 m, msl, column, ...)
    Surface,
    /// Isobaric level in hPa
    PressureLevel(u32),
}

impl LevelKind {
    /// `"<n> mb"` is a pressure level, everything else counts as surface.
    pub fn from_descriptor(descriptor: &str) -> Self {
        descriptor
            .strip_suffix("mb")
            .and_then(|rest| {
                let mut chars = rest.chars();
                let separator = chars.next_back()?;
                if !separator.is_whitespace() {
                    return None;
                }
                let digits = chars.as_str();
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()
            })
            .map(LevelKind::PressureLevel)
            .unwrap_or(LevelKind::Surface)
    }
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKind::Surface => f.write_str("sfc"),
            LevelKind::PressureLevel(hpa) => write!(f, "{}mb", hpa),
        }
    }
}

/// Last byte of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteEnd {
    /// Inclusive offset of the last byte
    Offset(u64),
    /// The record runs to the end of the remote resource
    EndOfFile,
}

/// One message listed in an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    /// Archive file this message lives in
    pub source: Arc<SourceLocation>,
    /// Message number as listed in the index
    pub message: u32,
    pub byte_start: u64,
    /// Filled in by [`crate::derive_byte_ends`]; `EndOfFile` until then.
    pub byte_end: ByteEnd,
    /// Reference date code (`d=YYYYMMDDHH`)
    pub date_code: String,
    pub param: String,
    pub level: LevelKind,
    /// Forecast lead time in hours; end of the interval for accumulations
    pub step: u32,
    /// Raw level descriptor text
    pub descriptor: String,
}

impl fmt::Display for InventoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.byte_end {
            ByteEnd::Offset(end) => write!(
                f,
                "{:<10} {:<7} {:>3}  {:>10}-{:>10}",
                self.param,
                self.level.to_string(),
                self.step,
                self.byte_start,
                end
            ),
            ByteEnd::EndOfFile => write!(
                f,
                "{:<10} {:<7} {:>3}  {:>10}-       END",
                self.param,
                self.level.to_string(),
                self.step,
                self.byte_start
            ),
        }
    }
}

/// Parse one index line belonging to `source`.
///
/// The returned entry has `byte_end == EndOfFile`; end offsets depend on the
/// following line and are derived once the whole index is parsed.
pub fn parse_line(source: &Arc<SourceLocation>, line: &str) -> Result<InventoryEntry> {
    let malformed = || InventoryError::MalformedLine {
        line: line.to_string(),
    };

    let mut fields = line.splitn(6, ':');
    let mut next_field = || fields.next().ok_or_else(malformed);

    let message = parse_digits::<u32>(next_field()?).ok_or_else(malformed)?;
    let byte_start = parse_digits::<u64>(next_field()?).ok_or_else(malformed)?;
    let date_code = next_field()?
        .strip_prefix("d=")
        .filter(|d| is_digits(d))
        .ok_or_else(malformed)?
        .to_string();
    let param = next_field()?.to_string();
    let descriptor = next_field()?.to_string();
    let step_field = next_field()?;

    let token = step_token(step_field).ok_or_else(|| InventoryError::UndecodableStep {
        token: step_field
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
        line: line.to_string(),
    })?;
    let step = decode_step(token).ok_or_else(|| InventoryError::UndecodableStep {
        token: token.to_string(),
        line: line.to_string(),
    })?;

    Ok(InventoryEntry {
        source: Arc::clone(source),
        message,
        byte_start,
        byte_end: ByteEnd::EndOfFile,
        date_code,
        level: LevelKind::from_descriptor(&descriptor),
        param,
        step,
        descriptor,
    })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if is_digits(s) {
        s.parse().ok()
    } else {
        None
    }
}

/// Leading `anl`, or the leading run of digits and dashes.
fn step_token(field: &str) -> Option<&str> {
    if field.starts_with("anl") {
        return Some("anl");
    }
    let end = field
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(field.len());
    (end > 0).then(|| &field[..end])
}

/// `"anl"` → 0, `"6"` → 6, `"0-6"` → 6.
fn decode_step(token: &str) -> Option<u32> {
    if token == "anl" {
        return Some(0);
    }
    if is_digits(token) {
        return token.parse().ok();
    }
    let (from, to) = token.split_once('-')?;
    if is_digits(from) && is_digits(to) {
        to.parse().ok()
    } else {
        None
    }
}
