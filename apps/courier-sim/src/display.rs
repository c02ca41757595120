//! Log-only UI collaborators.

use tracing::{info, warn};

use courier_queue::{
    CompletedTransfer, CompletionStore, DisplayDelegate, StoreError, VisualState,
};
use courier_transfer::TransferDirection;

pub struct LogDelegate;

impl DisplayDelegate for LogDelegate {
    fn inserted(&self, conversation_id: Option<i64>, position: usize, id: &str) {
        info!(?conversation_id, position, id, "ui: row inserted");
    }

    fn removed(&self, conversation_id: Option<i64>, position: usize, id: &str, user_cancelled: bool) {
        info!(?conversation_id, position, id, user_cancelled, "ui: row removed");
    }

    fn progress_updated(&self, id: &str, state: &VisualState) {
        info!(
            id,
            tag = ?state.tag,
            progress = %format!("{:.0}%", state.progress * 100.0),
            "ui: progress"
        );
    }

    fn transfer_completed(&self, id: &str, direction: TransferDirection, _state: &VisualState) {
        info!(id, ?direction, "ui: transfer completed");
    }

    fn transfer_failed(&self, id: &str, _state: &VisualState, error: &str) {
        warn!(id, error, "ui: transfer failed, retry available");
    }

    fn reveal(&self, conversation_id: Option<i64>, id: &str) {
        info!(?conversation_id, id, "ui: scroll to row");
    }
}

/// Pretends to write message metadata; rejects downloads to exercise the
/// error path.
pub struct LogStore;

impl CompletionStore for LogStore {
    fn persist(&self, transfer: &CompletedTransfer) -> Result<(), StoreError> {
        if transfer.direction == TransferDirection::Download {
            return Err(StoreError {
                id: transfer.id.clone(),
                message: "message row not found".into(),
            });
        }
        let record = serde_json::to_string(transfer).map_err(|e| StoreError {
            id: transfer.id.clone(),
            message: e.to_string(),
        })?;
        info!(id = %transfer.id, %record, "store: message updated");
        Ok(())
    }
}
