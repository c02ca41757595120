//! Collaborators notified by the queue: the UI display delegate and the
//! completion store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use courier_transfer::{TransferDirection, TransferRequest};

use crate::error::StoreError;
use crate::mediator::VisualState;

/// Receives UI-facing updates from the [`StateMediator`](crate::StateMediator).
///
/// Called on the queue's sequential context, except [`reveal`](Self::reveal)
/// which fires from a timer task after the settle delay. Implementations
/// must not block.
pub trait DisplayDelegate: Send + Sync {
    /// A transfer row appeared at `position` in its conversation's list.
    fn inserted(&self, conversation_id: Option<i64>, position: usize, id: &str);

    /// A transfer row disappeared from its last known `position`.
    fn removed(&self, conversation_id: Option<i64>, position: usize, id: &str, user_cancelled: bool);

    fn progress_updated(&self, id: &str, state: &VisualState);

    /// Final-state callback, distinct from progress updates.
    fn transfer_completed(&self, id: &str, direction: TransferDirection, state: &VisualState);

    /// The transport failed. Never called for cancellations.
    fn transfer_failed(&self, id: &str, state: &VisualState, error: &str) {
        let _ = (id, state, error);
    }

    /// Scroll the freshly inserted row into view.
    fn reveal(&self, conversation_id: Option<i64>, id: &str) {
        let _ = (conversation_id, id);
    }
}

/// Delegate callbacks as messages.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Inserted {
        conversation_id: Option<i64>,
        position: usize,
        id: String,
    },
    Removed {
        conversation_id: Option<i64>,
        position: usize,
        id: String,
        user_cancelled: bool,
    },
    ProgressUpdated {
        id: String,
        state: VisualState,
    },
    Completed {
        id: String,
        direction: TransferDirection,
        state: VisualState,
    },
    Failed {
        id: String,
        state: VisualState,
        error: String,
    },
    Reveal {
        conversation_id: Option<i64>,
        id: String,
    },
}

/// [`DisplayDelegate`] that forwards every callback into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelDelegate {
    tx: mpsc::Sender<DisplayEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelDelegate {
    /// Creates the delegate and the receiving end of its channel.
    ///
    /// Callbacks must not block the queue, so an event that finds the
    /// channel full is dropped and counted in [`dropped`](Self::dropped).
    /// That includes `Inserted` and `Removed`: once the count moves, row
    /// positions a consumer derived from events are stale and it should
    /// rebuild its list from a queue snapshot.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DisplayEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let delegate = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (delegate, rx)
    }

    /// Number of events dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: DisplayEvent) {
        let structural = matches!(
            event,
            DisplayEvent::Inserted { .. } | DisplayEvent::Removed { .. }
        );
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            if structural {
                warn!("dropped structural display event, consumer must resync: {e}");
            } else {
                warn!("failed to forward display event: {e}");
            }
        }
    }
}

impl DisplayDelegate for ChannelDelegate {
    fn inserted(&self, conversation_id: Option<i64>, position: usize, id: &str) {
        self.forward(DisplayEvent::Inserted {
            conversation_id,
            position,
            id: id.to_string(),
        });
    }

    fn removed(&self, conversation_id: Option<i64>, position: usize, id: &str, user_cancelled: bool) {
        self.forward(DisplayEvent::Removed {
            conversation_id,
            position,
            id: id.to_string(),
            user_cancelled,
        });
    }

    fn progress_updated(&self, id: &str, state: &VisualState) {
        self.forward(DisplayEvent::ProgressUpdated {
            id: id.to_string(),
            state: state.clone(),
        });
    }

    fn transfer_completed(&self, id: &str, direction: TransferDirection, state: &VisualState) {
        self.forward(DisplayEvent::Completed {
            id: id.to_string(),
            direction,
            state: state.clone(),
        });
    }

    fn transfer_failed(&self, id: &str, state: &VisualState, error: &str) {
        self.forward(DisplayEvent::Failed {
            id: id.to_string(),
            state: state.clone(),
            error: error.to_string(),
        });
    }

    fn reveal(&self, conversation_id: Option<i64>, id: &str) {
        self.forward(DisplayEvent::Reveal {
            conversation_id,
            id: id.to_string(),
        });
    }
}

/// Final record of a finished transfer, handed to the [`CompletionStore`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTransfer {
    pub id: String,
    pub conversation_id: Option<i64>,
    pub direction: TransferDirection,
    pub request: TransferRequest,
    /// Opaque metadata returned by the transport (remote file id, URL...).
    pub metadata: serde_json::Value,
}

/// Persists completed transfers against their owning message.
///
/// Fire-and-forget from the queue's point of view: the item is already
/// `completed` when this runs and an error is only logged.
pub trait CompletionStore: Send + Sync {
    fn persist(&self, transfer: &CompletedTransfer) -> Result<(), StoreError>;
}

/// Store that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

impl CompletionStore for NoopStore {
    fn persist(&self, _transfer: &CompletedTransfer) -> Result<(), StoreError> {
        Ok(())
    }
}
