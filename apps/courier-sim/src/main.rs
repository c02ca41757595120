//! Courier transfer simulator.
//!
//! Runs the transfer queue against a simulated network: a handful of
//! uploads across two conversations, a flaky file that needs a retry, a
//! download, and a connectivity drop in the middle.
//!
//! Usage: `courier-sim [config.json]`. Set `RUST_LOG` to change verbosity.

mod display;
mod network;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_queue::{
    ConnectivityState, QueueConfig, QueueHandle, QueueService, TransferQueueSnapshot,
};
use courier_transfer::{TransferItem, TransferRequest, TransferState};

use display::{LogDelegate, LogStore};
use network::SimulatedTransport;

const STEP: Duration = Duration::from_millis(80);
const STEPS: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => QueueConfig::load(&path)
            .with_context(|| format!("loading queue config from {path}"))?,
        None => QueueConfig::default(),
    };
    info!(?config, "starting simulation");

    let (link, connectivity) = watch::channel(ConnectivityState::Connected);
    let queue = QueueService::spawn(
        config,
        Arc::new(SimulatedTransport::new(STEP, STEPS)),
        Arc::new(LogDelegate),
        Arc::new(LogStore),
        connectivity,
    )?;

    for (conversation, name) in [
        (1, "holiday.jpg"),
        (1, "flaky-scan.pdf"),
        (2, "voice-note.m4a"),
        (2, "slides.key"),
    ] {
        queue.enqueue(attachment(conversation, name)).await?;
    }
    let incoming = queue
        .enqueue(attachment(2, "shared-video.mp4").download())
        .await?;

    tokio::time::sleep(STEP * 4).await;
    info!("simulating connectivity loss");
    link.send(ConnectivityState::Disconnected)?;
    tokio::time::sleep(STEP * 3).await;
    link.send(ConnectivityState::Connecting)?;
    tokio::time::sleep(STEP).await;
    link.send(ConnectivityState::Connected)?;
    info!("connectivity restored");

    queue.pause(&incoming).await?;
    tokio::time::sleep(STEP * 2).await;
    queue.resume(&incoming).await?;

    retry_failures_until_drained(&queue).await?;

    queue.shutdown().await;
    info!("simulation finished");
    Ok(())
}

fn attachment(conversation: i64, name: &str) -> TransferItem {
    let request = TransferRequest::new(name, format!("/var/tmp/courier/{name}"), 256 * 1024);
    TransferItem::new(request).in_conversation(conversation)
}

/// Waits for the queue to empty, retrying failed transfers as they show up.
async fn retry_failures_until_drained(queue: &QueueHandle) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + STEP * STEPS * 20;
    loop {
        let snapshot: TransferQueueSnapshot = queue.snapshot().await?;
        if snapshot.is_empty() {
            return Ok(());
        }
        for item in snapshot.items() {
            if item.state() == TransferState::Failed {
                info!(id = %item.id(), "retrying failed transfer");
                queue.retry(item.id()).await?;
            }
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "queue did not drain, {} transfers left",
            snapshot.len()
        );
        tokio::time::sleep(STEP).await;
    }
}
