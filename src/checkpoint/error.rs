//! Checkpoint store error types.

use std::path::PathBuf;

/// Errors produced by [`CheckpointStore`](crate::checkpoint::CheckpointStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The snapshot file exists but could not be decoded.
    #[error("corrupt checkpoint snapshot {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory map could not be encoded.
    #[error("failed to encode checkpoint snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    /// File-system failure while reading or writing the snapshot.
    #[error("checkpoint i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("checkpoint store lock poisoned")]
    LockPoisoned,
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used by the checkpoint module.
pub type Result<T> = std::result::Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_displays_path() {
        let source = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = CheckpointError::Corrupt {
            path: PathBuf::from("/tmp/state.json"),
            source,
        };
        let msg = err.to_string();
        assert!(msg.contains("corrupt"), "got: {msg}");
        assert!(msg.contains("state.json"), "got: {msg}");
    }

    #[test]
    fn lock_poisoned_displays() {
        let err = CheckpointError::LockPoisoned;
        assert_eq!(err.to_string(), "checkpoint store lock poisoned");
    }

    #[test]
    fn io_error_wraps() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CheckpointError::io("/tmp/x", inner);
        assert!(err.to_string().contains("i/o"));
    }
}
