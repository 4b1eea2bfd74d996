//! Error handling for changeflow
//!
//! This module defines the crate-level error type and a Result alias. The
//! subsystems keep their own error enums ([`PipelineError`],
//! [`CheckpointError`]); this type wraps them for callers that span several.

use crate::checkpoint::CheckpointError;
use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for changeflow operations
#[derive(Error, Debug)]
pub enum ChangeflowError {
    /// Errors raised by the pipeline engine
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors raised by a checkpoint store
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ChangeflowError>,
    },
}

impl ChangeflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ChangeflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for changeflow operations
pub type Result<T> = std::result::Result<T, ChangeflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ChangeflowError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
