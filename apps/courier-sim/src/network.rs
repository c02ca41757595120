//! Simulated attachment transport.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use courier_queue::{Transport, TransportSink};
use courier_transfer::TransferItem;

/// Running sessions by item id, tagged with their attempt.
type Sessions = Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>;

/// Streams progress in fixed steps, then completes.
///
/// Files whose name contains `flaky` fail their first attempt halfway.
pub struct SimulatedTransport {
    step: Duration,
    steps: u32,
    running: Sessions,
    failed_once: Mutex<HashSet<String>>,
}

impl SimulatedTransport {
    pub fn new(step: Duration, steps: u32) -> Self {
        Self {
            step,
            steps: steps.max(1),
            running: Arc::new(Mutex::new(HashMap::new())),
            failed_once: Mutex::new(HashSet::new()),
        }
    }

    fn stop(&self, id: &str) -> bool {
        let session = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match session {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn should_fail(&self, item: &TransferItem) -> bool {
        item.request.file_name.contains("flaky")
            && self
                .failed_once
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(item.id().to_string())
    }
}

/// Drops the session entry unless a newer attempt already replaced it.
fn finish(running: &Sessions, id: &str, attempt: u64) {
    let mut running = running.lock().unwrap_or_else(|e| e.into_inner());
    if running.get(id).is_some_and(|(current, _)| *current == attempt) {
        running.remove(id);
    }
}

impl Transport for SimulatedTransport {
    fn start(&self, item: &TransferItem, sink: TransportSink) {
        let token = CancellationToken::new();
        let attempt = sink.attempt();
        if let Some((_, previous)) = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item.id().to_string(), (attempt, token.clone()))
        {
            previous.cancel();
        }

        let fail = self.should_fail(item);
        let step = self.step;
        let steps = self.steps;
        let size = item.request.size_bytes;
        let running = Arc::clone(&self.running);
        info!(id = %item.id(), attempt, size, "network: transfer started");

        tokio::spawn(async move {
            for n in 1..=steps {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(step) => {}
                }
                if fail && n * 2 > steps {
                    finish(&running, sink.id(), attempt);
                    sink.failed("simulated network error: connection reset");
                    return;
                }
                sink.progress(f64::from(n) * 100.0 / f64::from(steps));
            }
            finish(&running, sink.id(), attempt);
            sink.completed(serde_json::json!({
                "remoteId": format!("remote-{}", sink.id()),
                "bytes": size,
            }));
        });
    }

    fn pause(&self, id: &str) {
        if self.stop(id) {
            debug!(id, "network: transfer suspended");
        }
    }

    fn cancel(&self, id: &str) {
        if self.stop(id) {
            debug!(id, "network: transfer aborted");
        }
    }
}
