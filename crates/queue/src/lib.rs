//! Attachment transfer queue.
//!
//! Admits uploads and downloads in submission order under a concurrency
//! bound, drives each item's state machine from transport reports, pauses
//! on connectivity loss and resumes a bounded batch on reconnection.
//!
//! # Layers
//!
//! 1. [`TransferQueue`]: the sequential core. Every method takes `&mut self`.
//! 2. [`StateMediator`]: turns item changes into [`VisualState`]s and
//!    structural callbacks on a [`DisplayDelegate`].
//! 3. [`QueueService`]: runs the core on a single tokio task and exposes it
//!    through a cloneable [`QueueHandle`].
//!
//! The byte transfer itself is delegated to a [`Transport`] supplied by the
//! application.

pub mod config;
pub mod delegate;
pub mod error;
pub mod manager;
pub mod mediator;
pub(crate) mod scheduler;
pub mod service;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod types;

pub use config::QueueConfig;
pub use delegate::{
    ChannelDelegate, CompletedTransfer, CompletionStore, DisplayDelegate, DisplayEvent, NoopStore,
};
pub use error::{QueueError, StoreError};
pub use manager::TransferQueue;
pub use mediator::{StateMediator, VisualState, VisualTag};
pub use service::{QueueHandle, QueueService};
pub use transport::{Transport, TransportEvent, TransportReport, TransportSink};
pub use types::{ConnectivityState, TransferQueueSnapshot};

pub use courier_transfer::{
    PauseOrigin, TransferDirection, TransferItem, TransferRequest, TransferState,
};
