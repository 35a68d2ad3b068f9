//! Inventory-driven partial downloads of GRIB archives.
//!
//! Large GRIB2 archive files are published next to a small text index
//! (`.inv` / `.idx`) listing the byte offset of every embedded message.
//! This crate turns such an index into typed records, filters them by
//! pressure level and forecast step, and plans the byte ranges that have
//! to be requested to assemble only the selected messages.
//!
//! # Pipeline
//!
//! 1. [`parse_line`] decodes one index line into an [`InventoryEntry`].
//! 2. [`InventoryBuilder`] fetches the index of every source location,
//!    derives end offsets and concatenates the results into an [`Inventory`].
//! 3. [`SelectionCriteria`] filters the inventory.
//! 4. [`RangePlan`] groups the remaining records by source location.

pub mod builder;
pub mod entry;
pub mod error;
pub mod inventory;
pub mod ranges;
pub mod selector;

pub use builder::{BuildReport, EmptyReason, EmptySource, IndexFetcher, InventoryBuilder};
pub use entry::{parse_line, ByteEnd, InventoryEntry, LevelKind, SourceLocation};
pub use error::{FetchError, InventoryError, Result};
pub use inventory::{derive_byte_ends, parse_index, Inventory};
pub use ranges::{ByteRange, RangePlan, SourceGroup};
pub use selector::SelectionCriteria;
