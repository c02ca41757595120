//! Queue error types.

/// Errors produced by the queue crate.
///
/// Per-item failures never show up here: they become the item's `failed`
/// state. These are configuration and plumbing errors only.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("queue service closed")]
    Closed,
}

/// Failure reported by a [`CompletionStore`](crate::CompletionStore).
#[derive(Debug, thiserror::Error)]
#[error("persisting transfer {id} failed: {message}")]
pub struct StoreError {
    pub id: String,
    pub message: String,
}
