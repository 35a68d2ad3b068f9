//! Shared test utilities for the reforecast-fetch workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic GRIB index generators with known offsets
//! - Deterministic archive bodies to check ranged transfers against
//! - Fixture index texts in the shape real archive servers publish
//! - Temporary directory helpers
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{synthetic_index, fixtures};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

// Re-export commonly used items at the crate root
pub use generators::*;
pub use paths::*;

/// Assert that a slice of `(start, end)` pairs tiles a file without gaps.
///
/// `end` is `None` for the open-ended last range.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_contiguous;
///
/// assert_contiguous!(&[(0, Some(99)), (100, None)]);
/// ```
#[macro_export]
macro_rules! assert_contiguous {
    ($ranges:expr) => {{
        let ranges: &[(u64, Option<u64>)] = $ranges;
        for (i, pair) in ranges.windows(2).enumerate() {
            let (start, end) = pair[0];
            let (next_start, _) = pair[1];
            assert_eq!(
                end,
                Some(next_start - 1),
                "range {} ({}-{:?}) does not end right before range {} starts at {}",
                i,
                start,
                end,
                i + 1,
                next_start
            );
        }
        if let Some((start, end)) = ranges.last() {
            assert_eq!(*end, None, "last range starting at {} must be open-ended", start);
        }
    }};
}
