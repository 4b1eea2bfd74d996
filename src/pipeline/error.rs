//! Pipeline-specific error types.

use crate::checkpoint::CheckpointError;
use crate::pipeline::executor::PipelineState;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// A failure attributable to a single record in one adaptor.
///
/// Record errors are reported as telemetry and never stop the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("record error at {path}: {message}")]
pub struct RecordError {
    pub path: String,
    pub record: Option<Value>,
    pub message: String,
}

impl RecordError {
    pub fn new(path: impl Into<String>, record: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            record,
            message: message.into(),
        }
    }
}

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Non-fatal, per-record failure.
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("Node {path} failed to initialize: {message}")]
    NodeInit { path: String, message: String },

    #[error("Node {path} error: {message}")]
    Node { path: String, message: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pipeline settings: {0}")]
    InvalidSettings(String),

    #[error("Node {0} lost a child: data channel disconnected")]
    ChannelSend(String),

    #[error("Pipeline is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: PipelineState,
        actual: PipelineState,
    },

    #[error("Stop did not complete within {0:?}")]
    StopTimeout(Duration),

    #[error("Node thread for {0} panicked")]
    Panicked(String),
}

impl PipelineError {
    /// Build a fatal node error.
    pub fn node(path: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Node {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the pipeline keeps running after this error.
    pub fn is_record_level(&self) -> bool {
        matches!(self, PipelineError::Record(_))
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
