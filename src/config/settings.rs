//! Runtime settings handed to the pipeline.
//!
//! These are the already-resolved values the engine runs with; see
//! [`EngineConfig`](crate::config::EngineConfig) for the on-disk form.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default interval between metrics passes.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Default interval between checkpoint passes.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(10);

/// Default upper bound on the stop cascade.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of each node-to-child data channel.
pub const DEFAULT_DATA_CAPACITY: usize = 1024;

/// Default capacity of the telemetry event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// What a sender does when a bounded channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Wait for room.
    #[default]
    Block,
    /// Drop the item being sent.
    Drop,
}

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Overflow::Block => write!(f, "block"),
            Overflow::Drop => write!(f, "drop"),
        }
    }
}

/// Buffering and overflow behaviour of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    /// Maximum buffered items; `None` for unbounded.
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub overflow: Overflow,
}

impl ChannelPolicy {
    pub fn bounded(capacity: usize, overflow: Overflow) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            overflow: Overflow::Block,
        }
    }

    /// Default policy for node-to-child data channels.
    pub fn data_default() -> Self {
        Self::bounded(DEFAULT_DATA_CAPACITY, Overflow::Block)
    }

    /// Default policy for the telemetry event channel.
    pub fn events_default() -> Self {
        Self::bounded(DEFAULT_EVENT_CAPACITY, Overflow::Drop)
    }

    /// Create a channel following this policy.
    pub fn channel<T>(&self) -> (Sender<T>, Receiver<T>) {
        match self.capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        }
    }
}

/// Resolved engine settings for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Identity of this run; prefixes every checkpoint key.
    pub run_id: String,
    pub metrics_interval: Duration,
    pub checkpoint_interval: Duration,
    pub stop_timeout: Duration,
    pub data_channel: ChannelPolicy,
    pub event_channel: ChannelPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            run_id: default_run_id(),
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            data_channel: ChannelPolicy::data_default(),
            event_channel: ChannelPolicy::events_default(),
        }
    }
}

/// `host(unix_ts)`, unique enough to tell runs on one machine apart.
pub fn default_run_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}({})", host, chrono::Utc::now().timestamp())
}
