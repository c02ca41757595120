//! Per-item lifecycle state machine.
//!
//! ```text
//! queued ──admit──> active ──succeed──> completed
//!   │                 │ ├──fail──> failed ──retry──> active
//!   │                 │ │            └──requeue──> queued
//!   └──pause──> paused <┘
//!               └──resume──> queued
//! any non-terminal ──cancel──> cancelled
//! ```
//!
//! Concurrency slots are not an effect: a slot is held exactly while an
//! item is `active`, so leaving `active` frees it.

use crate::TransferError;
use crate::item::{PauseOrigin, TransferItem, TransferState};

/// Event driving a lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Scheduler granted a concurrency slot.
    Admit,
    /// Transport progress report, percent.
    Progress(f64),
    /// Transport finished successfully.
    Succeed,
    /// Transport reported an error.
    Fail(String),
    Pause(PauseOrigin),
    Resume,
    /// Restart a failed item immediately (a slot is free).
    Retry,
    /// Put a failed item back in line (no slot is free).
    Requeue,
    Cancel { user_initiated: bool },
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Admit => "admit",
            Trigger::Progress(_) => "progress",
            Trigger::Succeed => "succeed",
            Trigger::Fail(_) => "fail",
            Trigger::Pause(_) => "pause",
            Trigger::Resume => "resume",
            Trigger::Retry => "retry",
            Trigger::Requeue => "requeue",
            Trigger::Cancel { .. } => "cancel",
        }
    }
}

/// Side effect the owner of the item must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartTransport,
    SuspendTransport,
    AbortTransport,
    /// Hand final metadata to the completion store.
    Persist,
    /// Drop the item from the collection.
    Remove,
    /// Run a scheduler pass.
    Schedule,
}

/// Outcome of a successful [`TransferItem::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: TransferState,
    pub to: TransferState,
    pub effects: Vec<Effect>,
}

impl Transition {
    pub fn has(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }

    /// `true` if the lifecycle state changed (progress reports keep it).
    pub fn changed_state(&self) -> bool {
        self.from != self.to
    }
}

impl TransferItem {
    /// Applies `trigger` and returns the resulting transition.
    ///
    /// Illegal triggers leave the item untouched.
    pub fn apply(&mut self, trigger: Trigger) -> Result<Transition, TransferError> {
        use TransferState::*;

        let from = self.state;
        let effects = match (&trigger, from) {
            (Trigger::Admit, Queued) => {
                self.begin_attempt();
                vec![Effect::StartTransport]
            }
            (Trigger::Progress(pct), Active) => {
                self.record_progress(*pct);
                Vec::new()
            }
            (Trigger::Succeed, Active) => {
                self.state = Completed;
                self.progress = 100.0;
                self.session_open = false;
                vec![Effect::Persist, Effect::Remove, Effect::Schedule]
            }
            (Trigger::Fail(err), Active) => {
                self.state = Failed;
                self.error = Some(err.clone());
                self.session_open = false;
                vec![Effect::Schedule]
            }
            (Trigger::Pause(origin), Active) => {
                self.state = Paused;
                self.pause_origin = Some(*origin);
                vec![Effect::SuspendTransport, Effect::Schedule]
            }
            (Trigger::Pause(origin), Queued) => {
                self.state = Paused;
                self.pause_origin = Some(*origin);
                Vec::new()
            }
            // A user pause on top of a disconnect pause survives reconnection.
            (Trigger::Pause(PauseOrigin::User), Paused)
                if self.pause_origin != Some(PauseOrigin::User) =>
            {
                self.pause_origin = Some(PauseOrigin::User);
                Vec::new()
            }
            (Trigger::Resume, Paused) => {
                self.state = Queued;
                self.in_queue = true;
                self.pause_origin = None;
                vec![Effect::Schedule]
            }
            (Trigger::Retry, Failed) => {
                self.error = None;
                self.progress_reset = true;
                self.begin_attempt();
                vec![Effect::StartTransport]
            }
            (Trigger::Requeue, Failed) => {
                self.state = Queued;
                self.in_queue = true;
                self.error = None;
                self.progress_reset = true;
                vec![Effect::Schedule]
            }
            (Trigger::Cancel { user_initiated }, s) if !s.is_terminal() => {
                let mut effects = Vec::with_capacity(3);
                if self.session_open {
                    effects.push(Effect::AbortTransport);
                }
                effects.push(Effect::Remove);
                effects.push(Effect::Schedule);
                self.state = Cancelled;
                self.user_cancelled = *user_initiated;
                self.session_open = false;
                self.in_queue = false;
                effects
            }
            _ => {
                return Err(TransferError::IllegalTransition {
                    id: self.id().to_string(),
                    from,
                    trigger: trigger.name(),
                });
            }
        };

        Ok(Transition {
            from,
            to: self.state,
            effects,
        })
    }

    fn begin_attempt(&mut self) {
        self.state = TransferState::Active;
        self.in_queue = false;
        self.pause_origin = None;
        self.session_open = true;
        self.attempt += 1;
    }

    fn record_progress(&mut self, pct: f64) {
        if pct.is_nan() {
            return;
        }
        let pct = pct.clamp(0.0, 100.0);
        if self.progress_reset {
            self.progress = pct;
            self.progress_reset = false;
        } else {
            self.progress = self.progress.max(pct);
        }
    }
}
