//! Generators for synthetic GRIB indexes and archive bodies.
//!
//! The generated data is predictable so tests can check offsets and the
//! exact bytes a ranged transfer should have produced.

/// One record of a synthetic archive.
#[derive(Debug, Clone)]
pub struct SyntheticRecord {
    pub param: String,
    /// Level descriptor, e.g. `"700 mb"` or `"2 m above ground"`
    pub level: String,
    /// Step descriptor, e.g. `"6 hour fcst"`, `"0-6 hour acc fcst"` or `"anl"`
    pub step: String,
    /// Size of the encoded message in bytes
    pub size: u64,
}

impl SyntheticRecord {
    pub fn new(param: &str, level: &str, step: &str, size: u64) -> Self {
        Self {
            param: param.to_string(),
            level: level.to_string(),
            step: step.to_string(),
            size,
        }
    }
}

/// Formats one index line in the `msg:offset:d=date:param:level:step:` grammar.
///
/// # Example
///
/// ```
/// use test_utils::index_line;
///
/// let line = index_line(3, 2048, "2000010100", "TMP", "700 mb", "6 hour fcst");
/// assert_eq!(line, "3:2048:d=2000010100:TMP:700 mb:6 hour fcst:");
/// ```
pub fn index_line(message: u32, offset: u64, date: &str, param: &str, level: &str, step: &str) -> String {
    format!("{}:{}:d={}:{}:{}:{}:", message, offset, date, param, level, step)
}

/// Synthetic index for `records` laid out back to back.
///
/// # Returns
///
/// The index text (one line per record, newline terminated), the start
/// offset of every record, and the total archive length.
pub fn synthetic_index(date: &str, records: &[SyntheticRecord]) -> (String, Vec<u64>, u64) {
    let mut text = String::new();
    let mut offsets = Vec::with_capacity(records.len());
    let mut offset = 0u64;

    for (i, record) in records.iter().enumerate() {
        offsets.push(offset);
        text.push_str(&index_line(
            i as u32 + 1,
            offset,
            date,
            &record.param,
            &record.level,
            &record.step,
        ));
        text.push('\n');
        offset += record.size;
    }

    (text, offsets, offset)
}

/// Index of `count` temperature records on rotating pressure levels and
/// steps, each `size` bytes long.
///
/// Levels cycle through 500, 700, 850, 900 and 1000 hPa; steps advance by
/// 6 hours every five records, starting at the analysis.
pub fn pressure_level_records(count: usize, size: u64) -> Vec<SyntheticRecord> {
    const LEVELS: [u32; 5] = [500, 700, 850, 900, 1000];
    (0..count)
        .map(|i| {
            let level = format!("{} mb", LEVELS[i % LEVELS.len()]);
            let step = match (i / LEVELS.len()) * 6 {
                0 => "anl".to_string(),
                hours => format!("{} hour fcst", hours),
            };
            SyntheticRecord::new("TMP", &level, &step, size)
        })
        .collect()
}

/// Deterministic archive body of `len` bytes.
///
/// Byte `i` is `(i % 251) as u8`; 251 is prime so shifted slices rarely
/// look alike by accident.
///
/// # Example
///
/// ```
/// use test_utils::archive_body;
///
/// let body = archive_body(300);
/// assert_eq!(body[0], 0);
/// assert_eq!(body[251], 0);
/// assert_eq!(body[252], 1);
/// ```
pub fn archive_body(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Slice of [`archive_body`] for an inclusive range, `None` meaning to the end.
pub fn body_slice(body: &[u8], start: u64, end: Option<u64>) -> Vec<u8> {
    let start = start as usize;
    let end = end.map_or(body.len(), |e| (e as usize + 1).min(body.len()));
    body[start..end].to_vec()
}
