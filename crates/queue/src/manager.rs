//! Sequential core of the transfer queue.
//!
//! [`TransferQueue`] owns the ordered collection of transfers and is the
//! only place lifecycle transitions happen. It is not thread-safe on its
//! own: run it on one task (see [`QueueService`](crate::QueueService)) and
//! feed transport reports back through [`TransferQueue::handle_report`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use courier_transfer::{
    Effect, PauseOrigin, TransferItem, TransferState, Transition, Trigger,
};

use crate::config::QueueConfig;
use crate::delegate::{CompletedTransfer, CompletionStore, DisplayDelegate};
use crate::error::QueueError;
use crate::mediator::StateMediator;
use crate::scheduler::{self, StallFilter};
use crate::transport::{Transport, TransportEvent, TransportReport, TransportSink};
use crate::types::{ConnectivityState, TransferQueueSnapshot};

/// Ordered, bounded transfer queue.
pub struct TransferQueue {
    config: QueueConfig,
    /// Sorted by submission time; equal timestamps keep insertion order.
    items: Vec<TransferItem>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CompletionStore>,
    mediator: StateMediator,
    reports_tx: mpsc::UnboundedSender<TransportReport>,
    connectivity: ConnectivityState,
}

impl TransferQueue {
    /// Creates an empty queue.
    ///
    /// Returns the receiving end of the transport report channel; every
    /// report read from it must be passed to [`handle_report`](Self::handle_report).
    /// Fails with [`QueueError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        delegate: Arc<dyn DisplayDelegate>,
        store: Arc<dyn CompletionStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportReport>), QueueError> {
        config.validate()?;
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let mediator = StateMediator::new(delegate, config.settle_delay());
        let queue = Self {
            config,
            items: Vec::new(),
            transport,
            store,
            mediator,
            reports_tx,
            connectivity: ConnectivityState::Connected,
        };
        Ok((queue, reports_rx))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> TransferQueueSnapshot {
        TransferQueueSnapshot::new(self.items.clone())
    }

    pub fn get(&self, id: &str) -> Option<&TransferItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn active_count(&self) -> usize {
        scheduler::active_count(&self.items)
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Adds a transfer in submission order and runs a scheduler pass.
    ///
    /// An item whose id is already present replaces the existing one in
    /// place; the old transport session, if any, is aborted.
    pub fn enqueue(&mut self, item: TransferItem) {
        if item.state() != TransferState::Queued {
            warn!(id = %item.id(), state = %item.state(), "refusing to enqueue a non-queued transfer");
            return;
        }

        if let Some(idx) = self.index_of(item.id()) {
            let previous = &self.items[idx];
            if previous.has_session() {
                self.transport.cancel(previous.id());
            }
            let item = item.superseding(previous);
            info!(id = %item.id(), "transfer resubmitted, replacing in place");
            self.items[idx] = item;
            self.mediator.updated(&self.items[idx]);
        } else {
            let idx = self
                .items
                .partition_point(|existing| existing.submitted_at() <= item.submitted_at());
            info!(
                id = %item.id(),
                conversation = ?item.conversation_id,
                direction = ?item.direction,
                file = %item.request.file_name,
                "transfer enqueued"
            );
            self.items.insert(idx, item);
            let position = self.conversation_position(idx);
            self.mediator.appended(&self.items[idx], position);
        }

        self.schedule();
    }

    /// Pauses a queued or active transfer. Returns `false` if nothing changed.
    ///
    /// On a transfer already paused by a disconnect this only records the
    /// user's intent, so reconnection leaves it paused.
    pub fn pause(&mut self, id: &str) -> bool {
        let outcome = self.trigger(id, Trigger::Pause(PauseOrigin::User));
        self.settle(outcome)
    }

    /// Puts a paused transfer back in line at its original position.
    pub fn resume(&mut self, id: &str) -> bool {
        let outcome = self.trigger(id, Trigger::Resume);
        self.settle(outcome)
    }

    /// Restarts a failed transfer: immediately if a slot is free, otherwise
    /// it waits in line like any queued item.
    pub fn retry(&mut self, id: &str) -> bool {
        let Some(idx) = self.index_of(id) else {
            debug!(id, "retry for unknown transfer ignored");
            return false;
        };
        if self.items[idx].state() != TransferState::Failed {
            debug!(id, state = %self.items[idx].state(), "retry ignored, transfer not failed");
            return false;
        }
        let trigger = if self.can_admit() {
            Trigger::Retry
        } else {
            Trigger::Requeue
        };
        let outcome = self.drive(idx, trigger, None);
        self.settle(outcome)
    }

    /// Aborts and removes a transfer.
    ///
    /// `user_initiated` is recorded on the item so the UI can tell a user
    /// cancellation apart from a system one; neither is reported as a failure.
    pub fn cancel(&mut self, id: &str, user_initiated: bool) -> bool {
        let outcome = self.trigger(id, Trigger::Cancel { user_initiated });
        self.settle(outcome)
    }

    /// System-cancels every transfer of a conversation being torn down.
    pub fn cancel_conversation(&mut self, conversation_id: i64) -> usize {
        let ids = self.ids_where(|item| item.conversation_id == Some(conversation_id));
        let cancelled = self.trigger_many(&ids, |_| {
            Some(Trigger::Cancel {
                user_initiated: false,
            })
        });
        info!(conversation = conversation_id, cancelled, "conversation transfers cancelled");
        cancelled
    }

    /// Pauses every queued or active transfer.
    pub fn pause_all(&mut self) -> usize {
        self.pause_all_with(PauseOrigin::User)
    }

    /// Resumes the oldest stalled transfers, at most `reconnect_batch` of
    /// them. Failed transfers among them are retried.
    pub fn resume_all(&mut self) -> usize {
        let (batch, rest) =
            scheduler::stalled_batch(&self.items, StallFilter::Any, self.config.reconnect_batch);
        let lifted = self.lift(&batch);
        info!(lifted, remaining = rest.len(), "resume all");
        self.schedule();
        lifted
    }

    /// Cancels every transfer and empties the collection.
    pub fn cancel_all(&mut self) -> usize {
        self.cancel_all_with(true)
    }

    /// Aborts all transport sessions before the queue goes away.
    pub fn shutdown(&mut self) {
        let cancelled = self.cancel_all_with(false);
        info!(cancelled, "transfer queue shut down");
    }

    /// Reacts to a connectivity change.
    ///
    /// Losing the link pauses everything so in-flight transfers are not
    /// turned into failures. Regaining it lifts the oldest stalled
    /// transfers; further disconnect pauses go back in line.
    pub fn set_connectivity(&mut self, state: ConnectivityState) {
        let previous = std::mem::replace(&mut self.connectivity, state);
        if previous == state {
            return;
        }
        info!(from = ?previous, to = ?state, "connectivity changed");

        match (previous.is_connected(), state.is_connected()) {
            (true, false) => {
                self.pause_all_with(PauseOrigin::System);
            }
            (false, true) => self.reconnect(),
            _ => {}
        }
    }

    /// Applies a transport report on the queue's context.
    ///
    /// Reports for removed transfers or superseded attempts are dropped.
    pub fn handle_report(&mut self, report: TransportReport) {
        let TransportReport { id, attempt, event } = report;

        let Some(idx) = self.index_of(&id) else {
            debug!(id = %id, attempt, "stale report for unknown transfer");
            return;
        };
        let current = self.items[idx].attempt();
        if current != attempt {
            debug!(id = %id, attempt, current, "stale report from superseded attempt");
            return;
        }

        let outcome = match event {
            TransportEvent::Progress(pct) => self.drive(idx, Trigger::Progress(pct), None),
            TransportEvent::Completed(metadata) => self.drive(idx, Trigger::Succeed, Some(metadata)),
            TransportEvent::Failed(error) => self.drive(idx, Trigger::Fail(error), None),
        };
        self.settle(outcome);
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Admits the oldest queued transfers while slots are free.
    fn schedule(&mut self) {
        if !self.connectivity.is_connected() {
            debug!("offline, admission deferred");
            return;
        }
        while let Some(idx) = scheduler::next_admission(&self.items, self.config.max_concurrent) {
            if self.drive(idx, Trigger::Admit, None).is_none() {
                break;
            }
        }
        debug_assert!(self.active_count() <= self.config.max_concurrent);
    }

    fn can_admit(&self) -> bool {
        self.connectivity.is_connected()
            && scheduler::has_free_slot(&self.items, self.config.max_concurrent)
    }

    fn reconnect(&mut self) {
        let (batch, rest) = scheduler::stalled_batch(
            &self.items,
            StallFilter::SystemOnly,
            self.config.reconnect_batch,
        );
        let lifted = self.lift(&batch);

        // Beyond the batch, disconnect pauses go back in line; failures stay.
        let requeued = self.trigger_many(&rest, |item| {
            (item.state() == TransferState::Paused).then_some(Trigger::Resume)
        });
        info!(lifted, requeued, "reconnected");
        self.schedule();
    }

    fn pause_all_with(&mut self, origin: PauseOrigin) -> usize {
        let ids = self.ids_where(|item| {
            matches!(item.state(), TransferState::Active | TransferState::Queued)
        });
        let paused = self.trigger_many(&ids, |_| Some(Trigger::Pause(origin)));
        info!(paused, origin = ?origin, "pause all");
        paused
    }

    fn cancel_all_with(&mut self, user_initiated: bool) -> usize {
        let ids = self.ids_where(|_| true);
        self.trigger_many(&ids, |_| Some(Trigger::Cancel { user_initiated }))
    }

    /// Resumes paused and requeues failed transfers among `ids`. The caller
    /// runs the scheduler pass so admission stays in submission order.
    fn lift(&mut self, ids: &[String]) -> usize {
        let mut lifted = 0;
        for id in ids {
            let trigger = match self.get(id).map(TransferItem::state) {
                Some(TransferState::Paused) => Trigger::Resume,
                Some(TransferState::Failed) => Trigger::Requeue,
                _ => continue,
            };
            if self.trigger(id, trigger).is_some() {
                lifted += 1;
            }
        }
        lifted
    }

    // -----------------------------------------------------------------------
    // Transition plumbing
    // -----------------------------------------------------------------------

    /// Applies a trigger to each listed item, then runs one scheduler pass
    /// if any transition asked for it. Returns the number applied.
    fn trigger_many(
        &mut self,
        ids: &[String],
        trigger_for: impl Fn(&TransferItem) -> Option<Trigger>,
    ) -> usize {
        let mut applied = 0;
        let mut schedule = false;
        for id in ids {
            let Some(trigger) = self.get(id).and_then(&trigger_for) else {
                continue;
            };
            if let Some(wants_schedule) = self.trigger(id, trigger) {
                applied += 1;
                schedule |= wants_schedule;
            }
        }
        if schedule {
            self.schedule();
        }
        applied
    }

    fn trigger(&mut self, id: &str, trigger: Trigger) -> Option<bool> {
        match self.index_of(id) {
            Some(idx) => self.drive(idx, trigger, None),
            None => {
                debug!(id, trigger = trigger.name(), "unknown transfer, ignored");
                None
            }
        }
    }

    /// Runs the scheduler pass if the transition asked for one.
    fn settle(&mut self, outcome: Option<bool>) -> bool {
        if outcome == Some(true) {
            self.schedule();
        }
        outcome.is_some()
    }

    /// Applies `trigger` to the item at `idx` and carries out its effects.
    ///
    /// Returns `None` for an illegal trigger (no-op), otherwise whether a
    /// scheduler pass was requested.
    fn drive(
        &mut self,
        idx: usize,
        trigger: Trigger,
        metadata: Option<serde_json::Value>,
    ) -> Option<bool> {
        let item = &mut self.items[idx];
        let transition = match item.apply(trigger) {
            Ok(t) => t,
            Err(e) => {
                debug!("{e}, ignored");
                return None;
            }
        };

        if transition.changed_state() {
            if transition.to == TransferState::Failed {
                warn!(
                    id = %item.id(),
                    attempt = item.attempt(),
                    error = item.error().unwrap_or_default(),
                    "transfer failed"
                );
            } else {
                info!(
                    id = %item.id(),
                    attempt = item.attempt(),
                    from = %transition.from,
                    to = %transition.to,
                    "transfer state changed"
                );
            }
        }

        Some(self.run_effects(idx, &transition, metadata))
    }

    fn run_effects(
        &mut self,
        idx: usize,
        transition: &Transition,
        mut metadata: Option<serde_json::Value>,
    ) -> bool {
        let mut schedule = false;
        let mut remove = false;

        for effect in &transition.effects {
            match effect {
                Effect::StartTransport => {
                    let item = &self.items[idx];
                    let sink =
                        TransportSink::new(item.id(), item.attempt(), self.reports_tx.clone());
                    self.transport.start(item, sink);
                }
                Effect::SuspendTransport => self.transport.pause(self.items[idx].id()),
                Effect::AbortTransport => self.transport.cancel(self.items[idx].id()),
                Effect::Persist => {
                    self.persist(idx, metadata.take().unwrap_or(serde_json::Value::Null))
                }
                Effect::Remove => remove = true,
                Effect::Schedule => schedule = true,
            }
        }

        if remove {
            self.remove(idx);
        } else {
            self.mediator.updated(&self.items[idx]);
        }
        schedule
    }

    fn persist(&self, idx: usize, metadata: serde_json::Value) {
        let item = &self.items[idx];
        let record = CompletedTransfer {
            id: item.id().to_string(),
            conversation_id: item.conversation_id,
            direction: item.direction,
            request: item.request.clone(),
            metadata,
        };
        if let Err(e) = self.store.persist(&record) {
            warn!(id = %record.id, error = %e, "failed to persist completed transfer");
        }
    }

    fn remove(&mut self, idx: usize) {
        let position = self.conversation_position(idx);
        let item = self.items.remove(idx);
        if item.state() == TransferState::Completed {
            self.mediator.completed(&item);
        }
        self.mediator.removed(&item, position);
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    fn ids_where(&self, pred: impl Fn(&TransferItem) -> bool) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| pred(item))
            .map(|item| item.id().to_string())
            .collect()
    }

    /// Index of the item among the items of its own conversation.
    fn conversation_position(&self, idx: usize) -> usize {
        let conversation = self.items[idx].conversation_id;
        self.items[..idx]
            .iter()
            .filter(|item| item.conversation_id == conversation)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::DisplayEvent;
    use crate::testing::{Call, Harness, RecordingStore, item};
    use serde_json::json;

    fn state(h: &Harness, id: &str) -> Option<TransferState> {
        h.queue.get(id).map(TransferItem::state)
    }

    #[tokio::test]
    async fn serial_queue_scenario() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));
        h.queue.enqueue(item("c"));

        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(state(&h, "b"), Some(TransferState::Queued));
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));
        assert!(h.queue.get("b").unwrap().in_queue());

        h.transport.sink("a").completed(json!({"remoteId": "r-a"}));
        h.pump();
        assert!(h.queue.get("a").is_none());
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));

        assert!(h.queue.cancel("c", true));
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.queue.snapshot().ids(), vec!["b"]);
        assert_eq!(h.transport.started(), vec!["a", "b"]);

        let persisted = h.store.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, "a");
        assert_eq!(persisted[0].metadata["remoteId"], "r-a");
    }

    #[tokio::test]
    async fn admission_is_fifo() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("blocker"));
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));

        h.transport.sink("blocker").completed(json!(null));
        h.pump();
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(state(&h, "b"), Some(TransferState::Queued));
    }

    #[tokio::test]
    async fn older_submission_is_admitted_first_regardless_of_enqueue_order() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("blocker"));
        let newer = item("newer");
        let older = item("older").submitted_at_time(newer.submitted_at() - chrono::Duration::seconds(5));
        h.queue.enqueue(newer);
        h.queue.enqueue(older);

        assert_eq!(h.queue.snapshot().ids(), vec!["older", "blocker", "newer"]);
        h.transport.sink("blocker").completed(json!(null));
        h.pump();
        assert_eq!(state(&h, "older"), Some(TransferState::Active));
    }

    #[tokio::test]
    async fn concurrency_bound_holds_throughout() {
        let mut h = Harness::new(2);
        for i in 0..8 {
            h.queue.enqueue(item(&format!("t{i}")));
            assert!(h.queue.active_count() <= 2);
        }
        for i in 0..8 {
            let id = format!("t{i}");
            if i % 3 == 0 {
                h.transport.sink(&id).failed("network lost");
            } else {
                h.transport.sink(&id).completed(json!({}));
            }
            h.pump();
            assert!(h.queue.active_count() <= 2);
        }
        assert_eq!(h.transport.started().len(), 8);
        assert_eq!(h.queue.snapshot().count(TransferState::Failed), 3);
    }

    #[tokio::test]
    async fn pause_and_resume_are_idempotent_and_keep_order() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));
        h.queue.enqueue(item("c"));
        let submitted = h.queue.get("b").unwrap().submitted_at();

        assert!(h.queue.pause("b"));
        assert!(!h.queue.pause("b"));
        assert!(!h.queue.resume("a"));
        assert_eq!(h.queue.snapshot().ids(), vec!["a", "b", "c"]);
        assert_eq!(h.queue.get("b").unwrap().submitted_at(), submitted);

        assert!(h.queue.resume("b"));
        assert_eq!(state(&h, "b"), Some(TransferState::Queued));

        h.transport.sink("a").completed(json!({}));
        h.pump();
        // b kept its place ahead of c.
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));
    }

    #[tokio::test]
    async fn pausing_active_frees_the_slot() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));

        assert!(h.queue.pause("a"));
        assert_eq!(state(&h, "a"), Some(TransferState::Paused));
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
        assert!(h.transport.calls().contains(&Call::Pause("a".into())));

        // Resumed a is older than b but must wait for the slot.
        assert!(h.queue.resume("a"));
        assert_eq!(state(&h, "a"), Some(TransferState::Queued));
        h.transport.sink("b").completed(json!({}));
        h.pump();
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(h.queue.get("a").unwrap().attempt(), 2);
    }

    #[tokio::test]
    async fn unknown_ids_are_noops() {
        let mut h = Harness::new(1);
        assert!(!h.queue.pause("ghost"));
        assert!(!h.queue.resume("ghost"));
        assert!(!h.queue.cancel("ghost", true));
        assert!(!h.queue.retry("ghost"));
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn reports_after_cancel_are_discarded() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        let sink = h.transport.sink("a");

        assert!(h.queue.cancel("a", true));
        assert!(h.transport.calls().contains(&Call::Cancel("a".into())));

        sink.progress(50.0);
        sink.completed(json!({}));
        h.pump();
        assert!(h.queue.is_empty());
        assert!(h.store.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_before_start_never_starts_transport() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("busy"));
        h.queue.enqueue(item("a"));
        h.display_events();

        assert!(h.queue.cancel("a", true));
        assert_eq!(h.transport.started(), vec!["busy"]);
        assert!(!h.transport.calls().contains(&Call::Cancel("a".into())));

        let events = h.display_events();
        assert!(events.iter().any(|e| matches!(
            e,
            DisplayEvent::Removed { id, user_cancelled: true, .. } if id == "a"
        )));
        assert!(!events.iter().any(|e| matches!(e, DisplayEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn failure_is_not_retried_automatically() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));

        h.transport.sink("a").failed("invalid file");
        h.pump();
        assert_eq!(state(&h, "a"), Some(TransferState::Failed));
        assert_eq!(h.queue.get("a").unwrap().error(), Some("invalid file"));
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
        assert_eq!(h.transport.started(), vec!["a", "b"]);

        let events = h.display_events();
        assert!(events.iter().any(|e| matches!(
            e,
            DisplayEvent::Failed { id, error, .. } if id == "a" && error == "invalid file"
        )));
    }

    #[tokio::test]
    async fn retry_goes_straight_to_active_when_slot_free() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.transport.sink("a").progress(70.0);
        h.transport.sink("a").failed("timeout");
        h.pump();

        assert!(h.queue.retry("a"));
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert!(h.transport.calls().contains(&Call::Start {
            id: "a".into(),
            attempt: 2
        }));

        h.transport.sink("a").progress(20.0);
        h.pump();
        assert_eq!(h.queue.get("a").unwrap().progress(), 20.0);
    }

    #[tokio::test]
    async fn retry_waits_when_no_slot() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.transport.sink("a").failed("timeout");
        h.pump();
        h.queue.enqueue(item("b"));
        assert_eq!(state(&h, "b"), Some(TransferState::Active));

        assert!(h.queue.retry("a"));
        assert_eq!(state(&h, "a"), Some(TransferState::Queued));
        assert!(!h.queue.retry("a"));
    }

    #[tokio::test]
    async fn disconnect_pauses_instead_of_failing() {
        let mut h = Harness::new(2);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));
        h.queue.enqueue(item("c"));

        h.queue.set_connectivity(ConnectivityState::Disconnected);
        let snap = h.queue.snapshot();
        assert_eq!(snap.count(TransferState::Paused), 3);
        assert_eq!(snap.count(TransferState::Failed), 0);
        assert_eq!(
            h.queue.get("a").unwrap().pause_origin(),
            Some(PauseOrigin::System)
        );
        let calls = h.transport.calls();
        assert!(calls.contains(&Call::Pause("a".into())));
        assert!(calls.contains(&Call::Pause("b".into())));
        assert!(!calls.contains(&Call::Pause("c".into())));

        h.queue.set_connectivity(ConnectivityState::Connected);
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));
    }

    #[tokio::test]
    async fn reconnection_lifts_three_oldest_failures() {
        let mut h = Harness::new(1);
        for id in ["a", "b", "c", "d", "e"] {
            h.queue.enqueue(item(id));
        }
        for id in ["a", "b", "c", "d", "e"] {
            h.transport.sink(id).failed("connection reset");
            h.pump();
        }
        assert_eq!(h.queue.snapshot().count(TransferState::Failed), 5);

        h.queue.set_connectivity(ConnectivityState::Disconnected);
        h.queue.set_connectivity(ConnectivityState::Connected);

        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(state(&h, "b"), Some(TransferState::Queued));
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));
        assert_eq!(state(&h, "d"), Some(TransferState::Failed));
        assert_eq!(state(&h, "e"), Some(TransferState::Failed));
    }

    #[tokio::test]
    async fn reconnection_leaves_user_pauses_alone() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));
        h.queue.pause("b");

        h.queue.set_connectivity(ConnectivityState::Disconnected);
        h.queue.set_connectivity(ConnectivityState::Connected);

        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(state(&h, "b"), Some(TransferState::Paused));
        assert_eq!(
            h.queue.get("b").unwrap().pause_origin(),
            Some(PauseOrigin::User)
        );
    }

    #[tokio::test]
    async fn offline_enqueue_waits_for_connection() {
        let mut h = Harness::new(1);
        h.queue.set_connectivity(ConnectivityState::Disconnected);
        h.queue.enqueue(item("a"));
        assert_eq!(state(&h, "a"), Some(TransferState::Queued));
        assert!(h.transport.started().is_empty());

        h.queue.set_connectivity(ConnectivityState::Connecting);
        assert!(h.transport.started().is_empty());

        h.queue.set_connectivity(ConnectivityState::Connected);
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
    }

    #[tokio::test]
    async fn construction_rejects_invalid_config() {
        let transport = Arc::new(crate::testing::MockTransport::default());
        let (delegate, _display) = crate::delegate::ChannelDelegate::new(8);
        let config = QueueConfig::default().with_max_concurrent(0);

        let result = TransferQueue::new(
            config,
            transport,
            Arc::new(delegate),
            Arc::new(crate::delegate::NoopStore),
        );
        assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn user_pause_during_outage_survives_reconnection() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));

        h.queue.set_connectivity(ConnectivityState::Disconnected);
        assert!(h.queue.pause("a"));
        assert!(!h.queue.pause("a"));
        assert_eq!(
            h.queue.get("a").unwrap().pause_origin(),
            Some(PauseOrigin::User)
        );

        h.queue.set_connectivity(ConnectivityState::Connected);
        assert_eq!(state(&h, "a"), Some(TransferState::Paused));
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
    }

    #[tokio::test]
    async fn resume_all_requeues_failed_in_submission_order() {
        let mut h = Harness::new(1);
        for id in ["a", "b", "c", "d", "e"] {
            h.queue.enqueue(item(id));
        }
        h.transport.sink("a").failed("timeout");
        h.pump();
        h.transport.sink("b").failed("timeout");
        h.pump();
        for id in ["c", "d", "e"] {
            assert!(h.queue.pause(id));
        }
        assert_eq!(h.queue.active_count(), 0);

        assert_eq!(h.queue.resume_all(), 3);
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(h.queue.get("a").unwrap().attempt(), 2);
        assert!(h.queue.get("a").unwrap().error().is_none());
        assert_eq!(state(&h, "b"), Some(TransferState::Queued));
        assert!(h.queue.get("b").unwrap().error().is_none());
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));
        assert_eq!(state(&h, "d"), Some(TransferState::Paused));
        assert_eq!(state(&h, "e"), Some(TransferState::Paused));

        h.transport.sink("a").completed(json!({}));
        h.pump();
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));
    }

    #[tokio::test]
    async fn resume_all_is_bounded() {
        let mut h = Harness::new(1);
        for id in ["a", "b", "c", "d", "e"] {
            h.queue.enqueue(item(id));
        }
        assert_eq!(h.queue.pause_all(), 5);
        assert_eq!(h.queue.active_count(), 0);

        assert_eq!(h.queue.resume_all(), 3);
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(state(&h, "b"), Some(TransferState::Queued));
        assert_eq!(state(&h, "c"), Some(TransferState::Queued));
        assert_eq!(state(&h, "d"), Some(TransferState::Paused));
        assert_eq!(state(&h, "e"), Some(TransferState::Paused));
    }

    #[tokio::test]
    async fn pause_all_skips_failed() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.transport.sink("a").failed("boom");
        h.pump();
        h.queue.enqueue(item("b"));

        assert_eq!(h.queue.pause_all(), 1);
        assert_eq!(state(&h, "a"), Some(TransferState::Failed));
        assert_eq!(state(&h, "b"), Some(TransferState::Paused));
    }

    #[tokio::test]
    async fn cancel_all_clears_everything() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));
        h.queue.pause("b");
        h.queue.enqueue(item("c"));

        assert_eq!(h.queue.cancel_all(), 3);
        assert!(h.queue.is_empty());
        assert_eq!(h.transport.started(), vec!["a"]);
        assert!(h.transport.calls().contains(&Call::Cancel("a".into())));
    }

    #[tokio::test]
    async fn cancel_conversation_is_system_initiated() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a").in_conversation(1));
        h.queue.enqueue(item("b").in_conversation(2));
        h.queue.enqueue(item("c").in_conversation(1));
        h.display_events();

        assert_eq!(h.queue.cancel_conversation(1), 2);
        assert_eq!(h.queue.snapshot().ids(), vec!["b"]);
        assert_eq!(state(&h, "b"), Some(TransferState::Active));

        let removals: Vec<_> = h
            .display_events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Removed {
                    id, user_cancelled, ..
                } => Some((id, user_cancelled)),
                _ => None,
            })
            .collect();
        assert_eq!(
            removals,
            vec![("a".to_string(), false), ("c".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn duplicate_enqueue_replaces_in_place() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));
        let stale_sink = h.transport.sink("a");

        h.queue.enqueue(item("a"));
        assert_eq!(h.queue.len(), 2);
        assert_eq!(h.queue.snapshot().ids(), vec!["a", "b"]);
        assert!(h.transport.calls().contains(&Call::Cancel("a".into())));
        // The replacement took the freed slot again with a new attempt.
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert_eq!(h.queue.get("a").unwrap().attempt(), 2);

        stale_sink.completed(json!({}));
        h.pump();
        assert_eq!(state(&h, "a"), Some(TransferState::Active));
        assert!(h.store.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_does_not_block_completion() {
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };
        let mut h = Harness::with_store(1, store);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));

        h.transport.sink("a").completed(json!({"remoteId": 1}));
        h.pump();
        assert!(h.queue.get("a").is_none());
        assert_eq!(state(&h, "b"), Some(TransferState::Active));
    }

    #[tokio::test]
    async fn completion_notifies_then_removes() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a").in_conversation(5));
        h.display_events();

        h.transport.sink("a").progress(40.0);
        h.transport.sink("a").completed(json!({}));
        h.pump();

        let events = h.display_events();
        assert!(matches!(events[0], DisplayEvent::ProgressUpdated { .. }));
        assert!(matches!(
            &events[1],
            DisplayEvent::Completed { id, .. } if id == "a"
        ));
        assert_eq!(
            events[2],
            DisplayEvent::Removed {
                conversation_id: Some(5),
                position: 0,
                id: "a".into(),
                user_cancelled: false
            }
        );
    }

    #[tokio::test]
    async fn insertion_position_is_per_conversation() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a").in_conversation(1));
        h.queue.enqueue(item("b").in_conversation(2));
        h.queue.enqueue(item("c").in_conversation(1));

        let inserted: Vec<_> = h
            .display_events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Inserted { id, position, .. } => Some((id, position)),
                _ => None,
            })
            .collect();
        assert_eq!(
            inserted,
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 0),
                ("c".to_string(), 1)
            ]
        );
    }

    #[tokio::test]
    async fn progress_for_paused_item_is_ignored() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.transport.sink("a").progress(10.0);
        h.pump();
        h.queue.pause("a");

        h.transport.sink("a").progress(90.0);
        h.pump();
        assert_eq!(h.queue.get("a").unwrap().progress(), 10.0);
        assert_eq!(state(&h, "a"), Some(TransferState::Paused));
    }

    #[tokio::test]
    async fn shutdown_aborts_sessions() {
        let mut h = Harness::new(1);
        h.queue.enqueue(item("a"));
        h.queue.enqueue(item("b"));
        h.queue.shutdown();
        assert!(h.queue.is_empty());
        assert!(h.transport.calls().contains(&Call::Cancel("a".into())));
        assert!(!h.transport.calls().contains(&Call::Cancel("b".into())));
    }
}
