use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    /// Returns `true` for states an item never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Queued => "queued",
            TransferState::Active => "active",
            TransferState::Paused => "paused",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the attachment leaves or arrives on this device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    #[default]
    Upload,
    Download,
}

/// Who paused a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseOrigin {
    /// Explicit user action.
    User,
    /// Connectivity loss. Reconnection may lift these pauses.
    System,
}

/// The file a transfer moves. Opaque to the queue, read by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub file_name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

impl TransferRequest {
    pub fn new(file_name: impl Into<String>, path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            path: path.into(),
            mime_type: None,
            size_bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// One upload or download and its transfer state.
///
/// Fields that describe the request are public. Lifecycle fields are only
/// mutated through [`TransferItem::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    id: String,
    pub conversation_id: Option<i64>,
    pub direction: TransferDirection,
    pub request: TransferRequest,
    submitted_at: DateTime<Utc>,
    pub(crate) state: TransferState,
    pub(crate) progress: f64,
    pub(crate) in_queue: bool,
    pub(crate) user_cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    pub(crate) attempt: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) pause_origin: Option<PauseOrigin>,
    /// A transport session was started and not yet finished or aborted.
    /// Survives pause so a later cancel still reaches the transport.
    pub(crate) session_open: bool,
    /// Set when a retry starts; the next progress report replaces the stored
    /// value instead of being max-merged.
    #[serde(skip)]
    pub(crate) progress_reset: bool,
}

impl TransferItem {
    /// Creates a queued upload with a fresh UUID and the current time.
    pub fn new(request: TransferRequest) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), request)
    }

    /// Creates a queued upload with a caller-chosen identifier.
    pub fn with_id(id: impl Into<String>, request: TransferRequest) -> Self {
        Self {
            id: id.into(),
            conversation_id: None,
            direction: TransferDirection::Upload,
            request,
            submitted_at: Utc::now(),
            state: TransferState::Queued,
            progress: 0.0,
            in_queue: true,
            user_cancelled: false,
            error: None,
            attempt: 0,
            pause_origin: None,
            session_open: false,
            progress_reset: false,
        }
    }

    pub fn in_conversation(mut self, conversation_id: i64) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn download(mut self) -> Self {
        self.direction = TransferDirection::Download;
        self
    }

    /// Overrides the submission timestamp.
    pub fn submitted_at_time(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// Prepares `self` to take the place of `previous` in a queue.
    ///
    /// Keeps the submission time, so the replacement does not move, and the
    /// attempt numbering, so reports for the replaced attempt stay stale.
    pub fn superseding(mut self, previous: &TransferItem) -> Self {
        self.submitted_at = previous.submitted_at;
        self.attempt = self.attempt.max(previous.attempt);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Progress percentage in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// `true` while the item waits for a concurrency slot.
    pub fn in_queue(&self) -> bool {
        self.in_queue
    }

    pub fn user_cancelled(&self) -> bool {
        self.user_cancelled
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of times the transport has been started for this item.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn pause_origin(&self) -> Option<PauseOrigin> {
        self.pause_origin
    }

    /// `true` if the transport holds a running or suspended session.
    pub fn has_session(&self) -> bool {
        self.session_open
    }
}
