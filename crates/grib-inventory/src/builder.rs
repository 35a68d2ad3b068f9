//! Building an inventory from one or more remote indexes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, instrument, warn};

use crate::entry::SourceLocation;
use crate::error::{FetchError, InventoryError};
use crate::inventory::{parse_index, Inventory};

/// Retrieves the text of a remote index file.
#[async_trait]
pub trait IndexFetcher: Send + Sync {
    async fn fetch_index(&self, url: &str) -> Result<String, FetchError>;
}

/// Why a source location contributed no records.
#[derive(Debug)]
pub enum EmptyReason {
    Fetch(FetchError),
    Parse(InventoryError),
    NoRecords,
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyReason::Fetch(e) => write!(f, "index download failed: {}", e),
            EmptyReason::Parse(e) => write!(f, "index unreadable: {}", e),
            EmptyReason::NoRecords => f.write_str("index lists no records"),
        }
    }
}

#[derive(Debug)]
pub struct EmptySource {
    pub location: Arc<SourceLocation>,
    pub reason: EmptyReason,
}

/// Result of [`InventoryBuilder::build`].
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Records of all locations that could be read, in declaration order
    pub inventory: Inventory,
    /// Locations that contributed zero records
    pub empty_sources: Vec<EmptySource>,
}

impl BuildReport {
    /// Every declared location contributed at least one record.
    pub fn is_complete(&self) -> bool {
        self.empty_sources.is_empty()
    }
}

/// Fetches and parses the indexes of a job's source locations.
///
/// Failures are isolated per location: a transport error or an undecodable
/// line drops that location's contribution and is reported in
/// [`BuildReport::empty_sources`], the remaining locations are still read.
pub struct InventoryBuilder<'a, F: ?Sized> {
    fetcher: &'a F,
}

impl<'a, F: IndexFetcher + ?Sized> InventoryBuilder<'a, F> {
    pub fn new(fetcher: &'a F) -> Self {
        Self { fetcher }
    }

    #[instrument(skip_all, fields(sources = locations.len()))]
    pub async fn build(&self, locations: &[SourceLocation]) -> BuildReport {
        let mut report = BuildReport::default();

        for location in locations {
            let location = Arc::new(location.clone());
            debug!(url = %location.index_url, "Reading inventory");

            let text = match self.fetcher.fetch_index(&location.index_url).await {
                Ok(text) => text,
                Err(e) => {
                    error!(
                        url = %location.index_url,
                        error = %e,
                        "Could not download inventory file, skipping source"
                    );
                    report.empty_sources.push(EmptySource {
                        location,
                        reason: EmptyReason::Fetch(e),
                    });
                    continue;
                }
            };

            match parse_index(&location, &text) {
                Ok(inventory) if inventory.is_empty() => {
                    warn!(url = %location.index_url, "Inventory file is empty");
                    report.empty_sources.push(EmptySource {
                        location,
                        reason: EmptyReason::NoRecords,
                    });
                }
                Ok(inventory) => {
                    debug!(
                        url = %location.index_url,
                        records = inventory.len(),
                        "Parsed inventory"
                    );
                    for entry in &inventory {
                        debug!("   INV {}", entry);
                    }
                    report.inventory.extend(inventory);
                }
                Err(e) => {
                    error!(
                        url = %location.index_url,
                        error = %e,
                        "Undecodable inventory line, discarding source"
                    );
                    report.empty_sources.push(EmptySource {
                        location,
                        reason: EmptyReason::Parse(e),
                    });
                }
            }
        }

        report
    }
}
