//! Admission policy.
//!
//! All functions take the collection in submission order and only read it;
//! the manager applies the decisions.

use courier_transfer::{PauseOrigin, TransferItem, TransferState};

pub(crate) fn active_count(items: &[TransferItem]) -> usize {
    items
        .iter()
        .filter(|item| item.state() == TransferState::Active)
        .count()
}

pub(crate) fn has_free_slot(items: &[TransferItem], max_concurrent: usize) -> bool {
    active_count(items) < max_concurrent
}

/// Index of the next item to admit, if a slot is free: the oldest `queued`
/// item. Paused items keep their place but are skipped.
pub(crate) fn next_admission(items: &[TransferItem], max_concurrent: usize) -> Option<usize> {
    if !has_free_slot(items, max_concurrent) {
        return None;
    }
    items
        .iter()
        .position(|item| item.state() == TransferState::Queued)
}

/// Which stalled items a bulk resume considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StallFilter {
    /// Explicit `resume_all`: every paused or failed item.
    Any,
    /// Reconnection: failed items and those paused by a disconnect.
    /// User pauses are left alone.
    SystemOnly,
}

impl StallFilter {
    fn matches(self, item: &TransferItem) -> bool {
        match item.state() {
            TransferState::Failed => true,
            TransferState::Paused => match self {
                StallFilter::Any => true,
                StallFilter::SystemOnly => item.pause_origin() == Some(PauseOrigin::System),
            },
            _ => false,
        }
    }
}

/// Ids of the oldest `limit` stalled items, followed by the ids of the
/// remaining stalled items.
pub(crate) fn stalled_batch(
    items: &[TransferItem],
    filter: StallFilter,
    limit: usize,
) -> (Vec<String>, Vec<String>) {
    let mut stalled = items
        .iter()
        .filter(|item| filter.matches(item))
        .map(|item| item.id().to_string());
    let batch: Vec<String> = stalled.by_ref().take(limit).collect();
    let rest: Vec<String> = stalled.collect();
    (batch, rest)
}
