//! Reconciles raw item state into UI-facing visual state.
//!
//! The mediator remembers the last [`VisualState`] pushed for each item and
//! suppresses updates that would not change what the user sees (progress
//! reports below the previous value, repeated reports at 100%, ...).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use courier_transfer::{TransferItem, TransferState};

use crate::delegate::DisplayDelegate;

/// Icon / affordance shown for a transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualTag {
    /// Queued behind other transfers.
    Waiting,
    Transferring,
    Paused,
    /// Shows the retry affordance.
    Failed,
    Completed,
    Cancelled,
}

/// Normalized snapshot of one transfer for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualState {
    pub tag: VisualTag,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub is_transferring: bool,
}

impl VisualState {
    pub fn of(item: &TransferItem) -> Self {
        let tag = match item.state() {
            TransferState::Queued => VisualTag::Waiting,
            TransferState::Active => VisualTag::Transferring,
            TransferState::Paused => VisualTag::Paused,
            TransferState::Failed => VisualTag::Failed,
            TransferState::Completed => VisualTag::Completed,
            TransferState::Cancelled => VisualTag::Cancelled,
        };
        let progress = if item.state() == TransferState::Completed {
            1.0
        } else {
            (item.progress() / 100.0).clamp(0.0, 1.0)
        };
        Self {
            tag,
            progress,
            is_transferring: item.state() == TransferState::Active,
        }
    }
}

/// Pushes visual state and structural changes to a [`DisplayDelegate`].
pub struct StateMediator {
    delegate: Arc<dyn DisplayDelegate>,
    settle_delay: Duration,
    last: HashMap<String, VisualState>,
    /// Reveals still waiting for the settle delay.
    pending_reveals: HashMap<String, CancellationToken>,
}

impl StateMediator {
    /// Creates a mediator. `settle_delay` postpones the reveal request after
    /// an insertion; zero reveals immediately.
    pub fn new(delegate: Arc<dyn DisplayDelegate>, settle_delay: Duration) -> Self {
        Self {
            delegate,
            settle_delay,
            last: HashMap::new(),
            pending_reveals: HashMap::new(),
        }
    }

    /// A new item entered the collection at `position` in its conversation.
    pub fn appended(&mut self, item: &TransferItem, position: usize) {
        let id = item.id().to_string();
        let conversation_id = item.conversation_id;
        self.delegate.inserted(conversation_id, position, &id);
        self.last.insert(id.clone(), VisualState::of(item));

        if self.settle_delay.is_zero() {
            self.delegate.reveal(conversation_id, &id);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let delegate = Arc::clone(&self.delegate);
                let delay = self.settle_delay;
                let token = CancellationToken::new();
                if let Some(previous) = self.pending_reveals.insert(id.clone(), token.clone()) {
                    previous.cancel();
                }
                handle.spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => delegate.reveal(conversation_id, &id),
                    }
                });
            }
            Err(_) => {
                debug!(id = %id, "no runtime for settle delay, revealing now");
                self.delegate.reveal(conversation_id, &id);
            }
        }
    }

    /// An item left the collection from its last known `position`.
    pub fn removed(&mut self, item: &TransferItem, position: usize) {
        self.last.remove(item.id());
        if let Some(reveal) = self.pending_reveals.remove(item.id()) {
            reveal.cancel();
        }
        self.delegate.removed(
            item.conversation_id,
            position,
            item.id(),
            item.user_cancelled(),
        );
    }

    /// Progress or lifecycle change that keeps the item in the collection.
    pub fn updated(&mut self, item: &TransferItem) {
        let state = VisualState::of(item);
        if self.last.get(item.id()) == Some(&state) {
            trace!(id = %item.id(), "visual state unchanged");
            return;
        }
        self.delegate.progress_updated(item.id(), &state);
        if state.tag == VisualTag::Failed {
            self.delegate
                .transfer_failed(item.id(), &state, item.error().unwrap_or_default());
        }
        self.last.insert(item.id().to_string(), state);
    }

    /// The transfer finished; the row should swap to its final icon.
    pub fn completed(&mut self, item: &TransferItem) {
        let state = VisualState::of(item);
        self.delegate
            .transfer_completed(item.id(), item.direction, &state);
        self.last.insert(item.id().to_string(), state);
    }
}
