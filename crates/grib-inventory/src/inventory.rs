//! Parsed inventories and end-offset derivation.

use std::sync::Arc;

use crate::entry::{parse_line, ByteEnd, InventoryEntry, SourceLocation};
use crate::error::{InventoryError, Result};
use crate::ranges::RangePlan;
use crate::selector::SelectionCriteria;

/// Ordered sequence of index records, possibly spanning several source
/// locations. Within one location records keep their index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn new(entries: Vec<InventoryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InventoryEntry> {
        self.entries.iter()
    }

    /// Append the records of another location after the current ones.
    pub fn extend(&mut self, other: Inventory) {
        self.entries.extend(other.entries);
    }

    /// Keep the records matching `criteria`, preserving order.
    pub fn select(&self, criteria: &SelectionCriteria) -> Inventory {
        self.entries
            .iter()
            .filter(|entry| criteria.matches(entry))
            .cloned()
            .collect()
    }

    /// Byte ranges to request, grouped by source location.
    pub fn range_plan(&self) -> RangePlan {
        RangePlan::from_entries(&self.entries)
    }
}

impl FromIterator<InventoryEntry> for Inventory {
    fn from_iter<I: IntoIterator<Item = InventoryEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a InventoryEntry;
    type IntoIter = std::slice::Iter<'a, InventoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Parse the full index text of one source location.
///
/// Blank lines are skipped. The first undecodable line fails the whole
/// location. End offsets are derived before returning.
pub fn parse_index(source: &Arc<SourceLocation>, text: &str) -> Result<Inventory> {
    let mut entries = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_line(source, line))
        .collect::<Result<Vec<_>>>()?;

    derive_byte_ends(&mut entries)?;
    Ok(Inventory::new(entries))
}

/// Fill in `byte_end` of every record of a single location.
///
/// Walks the records backwards: the last one reads to the end of the file,
/// every other one ends one byte before its successor starts.
pub fn derive_byte_ends(entries: &mut [InventoryEntry]) -> Result<()> {
    let mut next: Option<(u64, u32)> = None;

    for entry in entries.iter_mut().rev() {
        entry.byte_end = match next {
            None => ByteEnd::EndOfFile,
            Some((start, _)) if start > entry.byte_start => ByteEnd::Offset(start - 1),
            Some((start, message)) => {
                return Err(InventoryError::OffsetNotAscending {
                    message,
                    previous: entry.byte_start,
                    start,
                })
            }
        };
        next = Some((entry.byte_start, entry.message));
    }

    Ok(())
}
