//! Queue tuning knobs.
//!
//! Stored as JSON next to the rest of the client configuration, e.g.
//! `~/.config/courier/transfers.json`. Missing keys fall back to defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Default concurrency bound: strictly serial transfers.
pub const DEFAULT_MAX_CONCURRENT: usize = 1;

/// Default number of stalled items resumed at once after reconnection.
pub const DEFAULT_RECONNECT_BATCH: usize = 3;

const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
const DEFAULT_COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of simultaneously active transfers.
    pub max_concurrent: usize,
    /// Items resumed or retried by `resume_all` and on reconnection.
    pub reconnect_batch: usize,
    /// Delay before asking the UI to reveal a freshly inserted item.
    pub settle_delay_ms: u64,
    /// Capacity of the service command channel.
    pub command_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            reconnect_batch: DEFAULT_RECONNECT_BATCH,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// Loads the config from a JSON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no queue config, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), QueueError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_concurrent == 0 {
            return Err(QueueError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.reconnect_batch == 0 {
            return Err(QueueError::InvalidConfig(
                "reconnect_batch must be at least 1".into(),
            ));
        }
        if self.command_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "command_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
