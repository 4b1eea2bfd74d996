//! Telemetry events and the emitter contract.
//!
//! The pipeline reports its lifecycle (boot/exit), per-node message counts,
//! and record-level failures as [`Event`]s on a single channel. An
//! [`Emitter`] owns the receiving end and delivers events out of the process
//! (HTTP, logs, ...). Delivery transports beyond logging are left to callers.

pub mod emitters;

pub use emitters::{LogEmitter, NoopEmitter};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Endpoint descriptor of one node, carried by boot and exit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub kind: String,
}

/// Telemetry event produced by a running pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Boot {
        timestamp: i64,
        version: String,
        endpoints: Vec<Endpoint>,
    },
    Exit {
        timestamp: i64,
        version: String,
        endpoints: Vec<Endpoint>,
    },
    Metrics {
        timestamp: i64,
        path: String,
        message_count: u64,
    },
    Error {
        timestamp: i64,
        path: String,
        record: Option<Value>,
        message: String,
    },
}

impl Event {
    pub fn boot(version: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Event::Boot {
            timestamp: now(),
            version: version.into(),
            endpoints,
        }
    }

    pub fn exit(version: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Event::Exit {
            timestamp: now(),
            version: version.into(),
            endpoints,
        }
    }

    pub fn metrics(path: impl Into<String>, message_count: u64) -> Self {
        Event::Metrics {
            timestamp: now(),
            path: path.into(),
            message_count,
        }
    }

    pub fn error(path: impl Into<String>, record: Option<Value>, message: impl Into<String>) -> Self {
        Event::Error {
            timestamp: now(),
            path: path.into(),
            record,
            message: message.into(),
        }
    }

    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Boot { .. } => "boot",
            Event::Exit { .. } => "exit",
            Event::Metrics { .. } => "metrics",
            Event::Error { .. } => "error",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Boot { timestamp, .. }
            | Event::Exit { timestamp, .. }
            | Event::Metrics { timestamp, .. }
            | Event::Error { timestamp, .. } => *timestamp,
        }
    }
}

/// Current unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Delivers telemetry events out of the process.
///
/// The pipeline calls [`init`](Emitter::init) once with the event channel,
/// [`start`](Emitter::start) to begin delivery, and [`stop`](Emitter::stop)
/// during shutdown. `stop` must deliver events that were already queued
/// before returning and must be safe to call more than once.
#[cfg_attr(test, mockall::automock)]
pub trait Emitter: Send {
    fn init(&mut self, events: Receiver<Event>);

    fn start(&mut self);

    fn stop(&mut self);
}
