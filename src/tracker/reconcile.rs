//! Reconcile planning: which rows to cancel and which to start.

use std::collections::HashSet;

use crate::types::RowId;

/// Cancel and start sets computed from one snapshot of tracked and visible rows
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Tracked rows that are no longer visible, in ascending order
    pub to_cancel: Vec<RowId>,
    /// Visible rows with nothing tracked, in visible order without duplicates
    pub to_start: Vec<RowId>,
}

impl ReconcilePlan {
    /// Whether the plan does nothing
    pub fn is_empty(&self) -> bool {
        self.to_cancel.is_empty() && self.to_start.is_empty()
    }
}

/// Compute `tracked - visible` and `visible - tracked`
///
/// Both sets come from the same snapshot, so a row can never appear in both.
pub fn plan_reconcile(tracked: &HashSet<RowId>, visible: &[RowId]) -> ReconcilePlan {
    let visible_set: HashSet<RowId> = visible.iter().copied().collect();

    let mut to_cancel: Vec<RowId> = tracked.difference(&visible_set).copied().collect();
    to_cancel.sort_unstable();

    let mut seen = HashSet::with_capacity(visible.len());
    let to_start = visible
        .iter()
        .copied()
        .filter(|row| !tracked.contains(row) && seen.insert(*row))
        .collect();

    ReconcilePlan {
        to_cancel,
        to_start,
    }
}
