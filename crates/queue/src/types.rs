//! Public types for the transfer queue.

use serde::{Deserialize, Serialize};

use courier_transfer::{TransferItem, TransferState};

/// Network reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Connected,
    /// Link is coming up. Treated like a disconnect until `Connected`.
    Connecting,
    Disconnected,
}

impl ConnectivityState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectivityState::Connected)
    }
}

/// Immutable copy of the queue, ordered by submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferQueueSnapshot {
    items: Vec<TransferItem>,
}

impl TransferQueueSnapshot {
    pub(crate) fn new(items: Vec<TransferItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TransferItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn state_of(&self, id: &str) -> Option<TransferState> {
        self.get(id).map(TransferItem::state)
    }

    pub fn count(&self, state: TransferState) -> usize {
        self.items.iter().filter(|item| item.state() == state).count()
    }

    /// Items belonging to one conversation, in submission order.
    pub fn for_conversation(&self, conversation_id: i64) -> Vec<&TransferItem> {
        self.items
            .iter()
            .filter(|item| item.conversation_id == Some(conversation_id))
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(TransferItem::id).collect()
    }
}
