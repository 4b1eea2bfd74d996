//! Configuration module for changeflow
//!
//! This module handles engine configuration:
//! - [`EngineConfig`], the TOML file read by the binary
//! - [`PipelineSettings`], the resolved values a pipeline runs with
//!
//! # Data Location
//!
//! Unless configured otherwise, checkpoints are stored in the
//! platform-appropriate data directory:
//! - **Linux**: `~/.local/share/changeflow/checkpoints.json`
//! - **macOS**: `~/Library/Application Support/changeflow/checkpoints.json`
//! - **Windows**: `%APPDATA%\changeflow\checkpoints.json`
//!
//! # Example
//!
//! ```toml
//! run_id = "orders-sync"
//! metrics_interval_ms = 500
//!
//! [checkpoint]
//! path = "/var/lib/changeflow/checkpoints.json"
//! flush = "periodic"
//! flush_interval_ms = 2000
//!
//! [channels.data]
//! capacity = 256
//! overflow = "block"
//! ```

pub mod settings;

pub use settings::*;

use crate::checkpoint::file::{FileCheckpointStore, FlushMode};
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::error::{ChangeflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Application identifier used for the data directory
pub const APP_ID: &str = "changeflow";

/// Checkpoint file name inside the data directory
pub const CHECKPOINT_FILE: &str = "checkpoints.json";

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Default checkpoint file location
pub fn default_checkpoint_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CHECKPOINT_FILE))
}

// ==================== Engine Config ====================

/// Top-level engine configuration, stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run identity; generated from host and start time when absent
    pub run_id: Option<String>,
    pub metrics_interval_ms: u64,
    pub stop_timeout_ms: u64,
    /// Directory for daily rolling log files; console only when absent
    pub log_dir: Option<PathBuf>,
    pub checkpoint: CheckpointConfig,
    pub channels: ChannelsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_id: None,
            metrics_interval_ms: DEFAULT_METRICS_INTERVAL.as_millis() as u64,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
            log_dir: None,
            checkpoint: CheckpointConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

/// How the checkpoint file is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlushPolicy {
    #[default]
    Synchronous,
    Periodic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Checkpoint file; defaults to the data directory
    pub path: Option<PathBuf>,
    /// Interval of the checkpoint ticker
    pub interval_ms: u64,
    pub flush: FlushPolicy,
    /// Only used with `flush = "periodic"`
    pub flush_interval_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval_ms: DEFAULT_CHECKPOINT_INTERVAL.as_millis() as u64,
            flush: FlushPolicy::Synchronous,
            flush_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub data: ChannelPolicy,
    pub events: ChannelPolicy,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            data: ChannelPolicy::data_default(),
            events: ChannelPolicy::events_default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChangeflowError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ChangeflowError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the checkpoint store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.flush == FlushPolicy::Periodic && self.checkpoint.flush_interval_ms == 0 {
            return Err(ChangeflowError::Config(
                "checkpoint.flush_interval_ms must be positive with flush = \"periodic\"".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration, falling back to defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}; using default configuration", e);
                Self::default()
            }
        }
    }

    /// Save configuration as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChangeflowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ChangeflowError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            ChangeflowError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Resolve into the settings a pipeline runs with
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            run_id: self.run_id.clone().unwrap_or_else(default_run_id),
            metrics_interval: Duration::from_millis(self.metrics_interval_ms),
            checkpoint_interval: Duration::from_millis(self.checkpoint.interval_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            data_channel: self.channels.data,
            event_channel: self.channels.events,
        }
    }

    /// Checkpoint file in use: the configured path, else the data directory
    pub fn checkpoint_path(&self) -> Option<PathBuf> {
        self.checkpoint.path.clone().or_else(default_checkpoint_path)
    }

    pub fn flush_mode(&self) -> FlushMode {
        match self.checkpoint.flush {
            FlushPolicy::Synchronous => FlushMode::Synchronous,
            FlushPolicy::Periodic => {
                FlushMode::Periodic(Duration::from_millis(self.checkpoint.flush_interval_ms))
            }
        }
    }

    /// Build the configured checkpoint store.
    ///
    /// Falls back to an in-memory store when no data directory can be
    /// determined.
    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        match self.checkpoint_path() {
            Some(path) => {
                tracing::info!("Checkpoints stored in {}", path.display());
                Arc::new(FileCheckpointStore::new(path, self.flush_mode()))
            }
            None => {
                tracing::warn!("No data directory available, checkpoints kept in memory");
                Arc::new(MemoryCheckpointStore::new())
            }
        }
    }
}
