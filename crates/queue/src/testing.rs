//! Mock collaborators shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use courier_transfer::{TransferItem, TransferRequest};

use crate::config::QueueConfig;
use crate::delegate::{ChannelDelegate, CompletedTransfer, CompletionStore, DisplayEvent};
use crate::error::StoreError;
use crate::manager::TransferQueue;
use crate::transport::{Transport, TransportReport, TransportSink};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Start { id: String, attempt: u64 },
    Pause(String),
    Cancel(String),
}

/// Records every call and keeps the latest sink per item.
#[derive(Default)]
pub(crate) struct MockTransport {
    calls: Mutex<Vec<Call>>,
    sinks: Mutex<HashMap<String, TransportSink>>,
}

impl MockTransport {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn sink(&self, id: &str) -> TransportSink {
        self.sinks.lock().unwrap().get(id).cloned().unwrap()
    }
}

impl Transport for MockTransport {
    fn start(&self, item: &TransferItem, sink: TransportSink) {
        self.calls.lock().unwrap().push(Call::Start {
            id: item.id().to_string(),
            attempt: sink.attempt(),
        });
        self.sinks.lock().unwrap().insert(item.id().to_string(), sink);
    }

    fn pause(&self, id: &str) {
        self.calls.lock().unwrap().push(Call::Pause(id.to_string()));
    }

    fn cancel(&self, id: &str) {
        self.calls.lock().unwrap().push(Call::Cancel(id.to_string()));
    }
}

#[derive(Default)]
pub(crate) struct RecordingStore {
    pub(crate) persisted: Mutex<Vec<CompletedTransfer>>,
    pub(crate) fail: bool,
}

impl CompletionStore for RecordingStore {
    fn persist(&self, transfer: &CompletedTransfer) -> Result<(), StoreError> {
        self.persisted.lock().unwrap().push(transfer.clone());
        if self.fail {
            return Err(StoreError {
                id: transfer.id.clone(),
                message: "database locked".into(),
            });
        }
        Ok(())
    }
}

pub(crate) struct Harness {
    pub(crate) queue: TransferQueue,
    pub(crate) transport: Arc<MockTransport>,
    pub(crate) store: Arc<RecordingStore>,
    pub(crate) display: mpsc::Receiver<DisplayEvent>,
    pub(crate) reports: mpsc::UnboundedReceiver<TransportReport>,
}

impl Harness {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self::with_store(max_concurrent, RecordingStore::default())
    }

    pub(crate) fn with_store(max_concurrent: usize, store: RecordingStore) -> Self {
        let config = QueueConfig::default()
            .with_max_concurrent(max_concurrent)
            .with_settle_delay(Duration::ZERO);
        let transport = Arc::new(MockTransport::default());
        let store = Arc::new(store);
        let (delegate, display) = ChannelDelegate::new(1024);
        let (queue, reports) =
            TransferQueue::new(config, transport.clone(), Arc::new(delegate), store.clone())
                .unwrap();
        Self {
            queue,
            transport,
            store,
            display,
            reports,
        }
    }

    /// Feeds every pending transport report into the queue.
    pub(crate) fn pump(&mut self) {
        while let Ok(report) = self.reports.try_recv() {
            self.queue.handle_report(report);
        }
    }

    pub(crate) fn display_events(&mut self) -> Vec<DisplayEvent> {
        let mut out = Vec::new();
        while let Ok(e) = self.display.try_recv() {
            out.push(e);
        }
        out
    }
}

pub(crate) fn item(id: &str) -> TransferItem {
    TransferItem::with_id(id, TransferRequest::new(format!("{id}.jpg"), format!("/tmp/{id}.jpg"), 1024))
}
