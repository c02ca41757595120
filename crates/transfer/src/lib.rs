//! Attachment transfer items and their lifecycle state machine.
//!
//! A [`TransferItem`] wraps one upload or download request together with
//! its mutable transfer state. All lifecycle changes go through
//! [`TransferItem::apply`], which validates the [`Trigger`] against the
//! current [`TransferState`] and returns the [`Effect`]s the owner must run.

mod item;
mod state;

pub use item::{PauseOrigin, TransferDirection, TransferItem, TransferRequest, TransferState};
pub use state::{Effect, Transition, Trigger};

/// Errors produced by the transfer crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("illegal transition for {id}: {trigger} while {from}")]
    IllegalTransition {
        id: String,
        from: TransferState,
        trigger: &'static str,
    },
}
