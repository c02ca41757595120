//! Byte transport boundary.
//!
//! The application implements [`Transport`] on top of its HTTP or socket
//! client. Using a trait keeps queue logic decoupled from the network and
//! testable with mocks.

use tokio::sync::mpsc;

use courier_transfer::TransferItem;

/// Event reported by the transport for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Percent complete, `0..=100`. Out-of-range values are clamped.
    Progress(f64),
    /// Transfer finished. The metadata is opaque and goes to the store.
    Completed(serde_json::Value),
    /// Transfer failed. The message is shown to the user as-is.
    Failed(String),
}

/// A [`TransportEvent`] tagged with the item and attempt it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportReport {
    pub id: String,
    pub attempt: u64,
    pub event: TransportEvent,
}

/// Performs the actual upload or download.
///
/// All methods are called from the queue's sequential context and must
/// return promptly: implementations spawn their own work and report back
/// through the [`TransportSink`].
pub trait Transport: Send + Sync {
    /// Starts (or restarts after a pause) the transfer for `item`.
    fn start(&self, item: &TransferItem, sink: TransportSink);

    /// Suspends an in-flight transfer. Progress made so far may be kept.
    fn pause(&self, id: &str);

    /// Aborts a running or suspended transfer.
    fn cancel(&self, id: &str);
}

/// Reporting channel handed to [`Transport::start`].
///
/// Cheap to clone and usable from any thread. Reports are marshaled onto
/// the queue's sequential context; reports for a cancelled item or an
/// older attempt are discarded there.
#[derive(Debug, Clone)]
pub struct TransportSink {
    id: String,
    attempt: u64,
    tx: mpsc::UnboundedSender<TransportReport>,
}

impl TransportSink {
    pub fn new(id: impl Into<String>, attempt: u64, tx: mpsc::UnboundedSender<TransportReport>) -> Self {
        Self {
            id: id.into(),
            attempt,
            tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Returns `false` once the queue is gone.
    pub fn progress(&self, percent: f64) -> bool {
        self.send(TransportEvent::Progress(percent))
    }

    pub fn completed(&self, metadata: serde_json::Value) -> bool {
        self.send(TransportEvent::Completed(metadata))
    }

    pub fn failed(&self, error: impl Into<String>) -> bool {
        self.send(TransportEvent::Failed(error.into()))
    }

    fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportReport {
                id: self.id.clone(),
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }
}
