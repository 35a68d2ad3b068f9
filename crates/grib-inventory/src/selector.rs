//! Record selection by pressure level and forecast step.

use std::collections::BTreeSet;

use crate::entry::{InventoryEntry, LevelKind};

/// Which records of an inventory to keep.
///
/// `None` on an axis means "do not filter on this axis". A level filter
/// only ever matches pressure-level records; surface records are dropped
/// as soon as levels are requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub levels: Option<BTreeSet<u32>>,
    pub steps: Option<BTreeSet<u32>>,
}

impl SelectionCriteria {
    /// Keep everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_levels(mut self, levels: impl IntoIterator<Item = u32>) -> Self {
        self.levels = Some(levels.into_iter().collect());
        self
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = u32>) -> Self {
        self.steps = Some(steps.into_iter().collect());
        self
    }

    pub fn matches(&self, entry: &InventoryEntry) -> bool {
        let level_ok = match (&self.levels, entry.level) {
            (None, _) => true,
            (Some(levels), LevelKind::PressureLevel(hpa)) => levels.contains(&hpa),
            (Some(_), LevelKind::Surface) => false,
        };
        level_ok
            && self
                .steps
                .as_ref()
                .map_or(true, |steps| steps.contains(&entry.step))
    }
}
