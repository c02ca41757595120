//! Single-task runner for the transfer queue.
//!
//! [`QueueService`] owns a [`TransferQueue`] and serializes everything that
//! touches it: commands from any number of [`QueueHandle`]s, transport
//! reports and connectivity changes. Nothing else mutates the queue.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use courier_transfer::TransferItem;

use crate::config::QueueConfig;
use crate::delegate::{CompletionStore, DisplayDelegate};
use crate::error::QueueError;
use crate::manager::TransferQueue;
use crate::transport::{Transport, TransportReport};
use crate::types::{ConnectivityState, TransferQueueSnapshot};

enum QueueCommand {
    Enqueue(TransferItem),
    Pause(String, oneshot::Sender<bool>),
    Resume(String, oneshot::Sender<bool>),
    Retry(String, oneshot::Sender<bool>),
    Cancel(String, oneshot::Sender<bool>),
    CancelConversation(i64, oneshot::Sender<usize>),
    PauseAll(oneshot::Sender<usize>),
    ResumeAll(oneshot::Sender<usize>),
    CancelAll(oneshot::Sender<usize>),
    Snapshot(oneshot::Sender<TransferQueueSnapshot>),
}

/// Event loop driving a [`TransferQueue`].
///
/// Commands from one handle are applied in the order they were sent, but
/// connectivity changes and transport reports travel on their own channels:
/// a connectivity change is not ordered against commands still waiting in
/// the command channel. Await a reply (e.g. [`QueueHandle::snapshot`]) to
/// know a command has been applied.
pub struct QueueService {
    queue: TransferQueue,
    commands: mpsc::Receiver<QueueCommand>,
    reports: mpsc::UnboundedReceiver<TransportReport>,
    connectivity: watch::Receiver<ConnectivityState>,
    cancel: CancellationToken,
}

impl QueueService {
    /// Spawns the service on the current runtime and returns a handle to it.
    ///
    /// `connectivity` is the platform's reachability signal; its current
    /// value is applied before the first command is processed.
    ///
    /// Fails with [`QueueError::InvalidConfig`] if `config` does not validate.
    pub fn spawn(
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        delegate: Arc<dyn DisplayDelegate>,
        store: Arc<dyn CompletionStore>,
        connectivity: watch::Receiver<ConnectivityState>,
    ) -> Result<QueueHandle, QueueError> {
        config.validate()?;
        let (commands_tx, commands) = mpsc::channel(config.command_capacity);
        let (queue, reports) = TransferQueue::new(config, transport, delegate, store)?;
        let cancel = CancellationToken::new();

        let service = Self {
            queue,
            commands,
            reports,
            connectivity,
            cancel: cancel.clone(),
        };
        tokio::spawn(service.run());

        Ok(QueueHandle {
            tx: commands_tx,
            cancel,
        })
    }

    async fn run(mut self) {
        let initial = *self.connectivity.borrow_and_update();
        self.queue.set_connectivity(initial);
        let mut watching = true;
        info!(
            max_concurrent = self.queue.config().max_concurrent,
            connectivity = ?initial,
            "transfer queue service started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.execute(cmd),
                    None => {
                        debug!("all queue handles dropped");
                        break;
                    }
                },

                Some(report) = self.reports.recv() => self.queue.handle_report(report),

                changed = self.connectivity.changed(), if watching => match changed {
                    Ok(()) => {
                        let state = *self.connectivity.borrow_and_update();
                        self.queue.set_connectivity(state);
                    }
                    Err(_) => {
                        debug!("connectivity source closed, keeping last state");
                        watching = false;
                    }
                },
            }
        }

        self.queue.shutdown();
        info!("transfer queue service stopped");
    }

    fn execute(&mut self, cmd: QueueCommand) {
        let q = &mut self.queue;
        // A dropped reply receiver only means the caller stopped waiting.
        match cmd {
            QueueCommand::Enqueue(item) => q.enqueue(item),
            QueueCommand::Pause(id, reply) => {
                let _ = reply.send(q.pause(&id));
            }
            QueueCommand::Resume(id, reply) => {
                let _ = reply.send(q.resume(&id));
            }
            QueueCommand::Retry(id, reply) => {
                let _ = reply.send(q.retry(&id));
            }
            QueueCommand::Cancel(id, reply) => {
                let _ = reply.send(q.cancel(&id, true));
            }
            QueueCommand::CancelConversation(conversation_id, reply) => {
                let _ = reply.send(q.cancel_conversation(conversation_id));
            }
            QueueCommand::PauseAll(reply) => {
                let _ = reply.send(q.pause_all());
            }
            QueueCommand::ResumeAll(reply) => {
                let _ = reply.send(q.resume_all());
            }
            QueueCommand::CancelAll(reply) => {
                let _ = reply.send(q.cancel_all());
            }
            QueueCommand::Snapshot(reply) => {
                let _ = reply.send(q.snapshot());
            }
        }
    }
}

/// Cloneable front end of a running [`QueueService`].
///
/// Every method fails with [`QueueError::Closed`] once the service stopped.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueCommand>,
    cancel: CancellationToken,
}

impl QueueHandle {
    /// Submits a transfer and returns its id.
    ///
    /// Returns once the command is queued, not once it has been applied.
    pub async fn enqueue(&self, item: TransferItem) -> Result<String, QueueError> {
        let id = item.id().to_string();
        self.tx
            .send(QueueCommand::Enqueue(item))
            .await
            .map_err(|_| QueueError::Closed)?;
        Ok(id)
    }

    pub async fn pause(&self, id: impl Into<String>) -> Result<bool, QueueError> {
        let id = id.into();
        self.request(|reply| QueueCommand::Pause(id, reply)).await
    }

    pub async fn resume(&self, id: impl Into<String>) -> Result<bool, QueueError> {
        let id = id.into();
        self.request(|reply| QueueCommand::Resume(id, reply)).await
    }

    pub async fn retry(&self, id: impl Into<String>) -> Result<bool, QueueError> {
        let id = id.into();
        self.request(|reply| QueueCommand::Retry(id, reply)).await
    }

    /// User-initiated cancellation.
    pub async fn cancel(&self, id: impl Into<String>) -> Result<bool, QueueError> {
        let id = id.into();
        self.request(|reply| QueueCommand::Cancel(id, reply)).await
    }

    pub async fn cancel_conversation(&self, conversation_id: i64) -> Result<usize, QueueError> {
        self.request(|reply| QueueCommand::CancelConversation(conversation_id, reply))
            .await
    }

    pub async fn pause_all(&self) -> Result<usize, QueueError> {
        self.request(QueueCommand::PauseAll).await
    }

    pub async fn resume_all(&self) -> Result<usize, QueueError> {
        self.request(QueueCommand::ResumeAll).await
    }

    pub async fn cancel_all(&self) -> Result<usize, QueueError> {
        self.request(QueueCommand::CancelAll).await
    }

    pub async fn snapshot(&self) -> Result<TransferQueueSnapshot, QueueError> {
        self.request(QueueCommand::Snapshot).await
    }

    /// Returns `true` once the service has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stops the service, aborting every transport session, and waits for
    /// the event loop to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tx.closed().await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> QueueCommand,
    ) -> Result<T, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| QueueError::Closed)?;
        reply_rx.await.map_err(|_| QueueError::Closed)
    }
}
