//! Byte-range planning for ranged transfers.

use std::fmt;
use std::sync::Arc;

use crate::entry::{ByteEnd, InventoryEntry, SourceLocation};

/// One contiguous byte interval of a remote file.
///
/// Formats as `start-end` or `start-` (read to end of file), the form used
/// in an HTTP `Range: bytes=` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: ByteEnd,
}

impl ByteRange {
    pub fn new(start: u64, end: ByteEnd) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered, unknown for open-ended ranges.
    pub fn byte_count(&self) -> Option<u64> {
        match self.end {
            ByteEnd::Offset(end) => Some(end - self.start + 1),
            ByteEnd::EndOfFile => None,
        }
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}", self)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            ByteEnd::Offset(end) => write!(f, "{}-{}", self.start, end),
            ByteEnd::EndOfFile => write!(f, "{}-", self.start),
        }
    }
}

impl From<&InventoryEntry> for ByteRange {
    fn from(entry: &InventoryEntry) -> Self {
        Self::new(entry.byte_start, entry.byte_end)
    }
}

/// The ranges to fetch from one source location, in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
    pub location: Arc<SourceLocation>,
    pub ranges: Vec<ByteRange>,
}

/// Ranges of a whole job grouped by source location.
///
/// Groups appear in the order their location was first encountered and
/// ranges are neither reordered nor coalesced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangePlan {
    groups: Vec<SourceGroup>,
}

impl RangePlan {
    pub fn new(groups: Vec<SourceGroup>) -> Self {
        Self { groups }
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a InventoryEntry>) -> Self {
        let mut groups: Vec<SourceGroup> = Vec::new();

        for entry in entries {
            let range = ByteRange::from(entry);
            match groups.iter_mut().find(|g| g.location == entry.source) {
                Some(group) => group.ranges.push(range),
                None => groups.push(SourceGroup {
                    location: Arc::clone(&entry.source),
                    ranges: vec![range],
                }),
            }
        }

        Self { groups }
    }

    pub fn groups(&self) -> &[SourceGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn range_count(&self) -> usize {
        self.groups.iter().map(|g| g.ranges.len()).sum()
    }
}
