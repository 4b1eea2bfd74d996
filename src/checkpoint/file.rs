//! File-backed [`CheckpointStore`].
//!
//! The whole checkpoint map is re-serialized on every flush; there is no
//! append log. Snapshots are written to a temporary sibling file, synced,
//! and renamed over the target so a crash mid-write never leaves a truncated
//! snapshot behind.

use crate::checkpoint::error::{CheckpointError, Result};
use crate::checkpoint::{checkpoint_key, Checkpoint, CheckpointStore, Selection};
use crate::message::Message;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// When the in-memory map is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Rewrite the file on every save.
    #[default]
    Synchronous,
    /// Rewrite the file on a fixed interval, plus once on shutdown.
    Periodic(Duration),
}

#[derive(Debug, Default)]
struct StoreState {
    states: BTreeMap<String, Checkpoint>,
    dirty: bool,
    /// Whether the snapshot on disk has been merged in.
    loaded: bool,
}

impl StoreState {
    /// Merge snapshot entries under the in-memory ones, which are newer.
    fn merge(&mut self, snapshot: BTreeMap<String, Checkpoint>) {
        for (k, cp) in snapshot {
            self.states.entry(k).or_insert(cp);
        }
        self.loaded = true;
    }
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    state: Mutex<StoreState>,
    /// Serializes file writes so snapshots never interleave.
    write_lock: Mutex<()>,
}

impl Shared {
    fn flush(&self) -> Result<()> {
        let _write = self.write_lock.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        let bytes = {
            let mut state = self.state.lock().map_err(|_| CheckpointError::LockPoisoned)?;
            let bytes = encode_snapshot(&state.states)?;
            state.dirty = false;
            bytes
        };

        if let Err(e) = write_snapshot(&self.path, &bytes) {
            // Keep the entries pending so the next flush retries them.
            if let Ok(mut state) = self.state.lock() {
                state.dirty = true;
            }
            return Err(e);
        }

        tracing::trace!("{} bytes written to {:?}", bytes.len(), self.path);
        Ok(())
    }

    fn flush_if_dirty(&self) -> Result<()> {
        let dirty = self
            .state
            .lock()
            .map_err(|_| CheckpointError::LockPoisoned)?
            .dirty;
        if dirty {
            self.flush()
        } else {
            Ok(())
        }
    }
}

struct Flusher {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Checkpoint store persisted as a single JSON snapshot file.
pub struct FileCheckpointStore {
    shared: Arc<Shared>,
    mode: FlushMode,
    flusher: Mutex<Option<Flusher>>,
}

impl FileCheckpointStore {
    /// Create a store writing to `path`.
    ///
    /// In [`FlushMode::Periodic`] a background flusher thread is started; it
    /// runs until [`CheckpointStore::shutdown`] is called or the store is
    /// dropped. A zero interval falls back to [`FlushMode::Synchronous`].
    pub fn new(path: impl Into<PathBuf>, mode: FlushMode) -> Self {
        let mode = match mode {
            FlushMode::Periodic(interval) if interval.is_zero() => {
                tracing::warn!("Zero checkpoint flush interval, writing synchronously");
                FlushMode::Synchronous
            }
            mode => mode,
        };
        let shared = Arc::new(Shared {
            path: path.into(),
            state: Mutex::new(StoreState::default()),
            write_lock: Mutex::new(()),
        });

        let flusher = match mode {
            FlushMode::Synchronous => None,
            FlushMode::Periodic(interval) => spawn_flusher(shared.clone(), interval),
        };

        Self {
            shared,
            mode,
            flusher: Mutex::new(flusher),
        }
    }

    /// Create a store that flushes on every save.
    pub fn synchronous(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FlushMode::Synchronous)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    fn flusher_running(&self) -> bool {
        self.flusher.lock().map(|f| f.is_some()).unwrap_or(false)
    }

    /// Merge the snapshot once before the first write, so flushing never
    /// drops entries of other runs that only exist on disk. An undecodable
    /// snapshot is moved to `<path>.corrupt` and replaced.
    fn ensure_loaded(&self) -> Result<()> {
        let loaded = self
            .shared
            .state
            .lock()
            .map_err(|_| CheckpointError::LockPoisoned)?
            .loaded;
        if loaded {
            return Ok(());
        }
        let snapshot = match self.load_snapshot() {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(CheckpointError::Corrupt { path, source }) => {
                tracing::warn!(
                    "Checkpoint snapshot {} is unreadable ({}), starting a new one",
                    path.display(),
                    source
                );
                set_aside(&path);
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        self.shared
            .state
            .lock()
            .map_err(|_| CheckpointError::LockPoisoned)?
            .merge(snapshot);
        Ok(())
    }

    /// Load and decode the full snapshot. `Ok(None)` if no file exists.
    fn load_snapshot(&self) -> Result<Option<BTreeMap<String, Checkpoint>>> {
        let path = &self.shared.path;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, run_id: &str, path: &str, msg: &Message) -> Result<()> {
        self.ensure_loaded()?;
        {
            let mut state = self
                .shared
                .state
                .lock()
                .map_err(|_| CheckpointError::LockPoisoned)?;
            state
                .states
                .insert(checkpoint_key(run_id, path), Checkpoint::from_message(msg));
            state.dirty = true;
        }

        // Once the periodic flusher has shut down, saves fall back to
        // synchronous writes so nothing recorded after shutdown is lost.
        if self.mode == FlushMode::Synchronous || !self.flusher_running() {
            self.shared.flush()?;
        }
        Ok(())
    }

    fn select(&self, run_id: &str, path: &str) -> Result<Selection> {
        let key = checkpoint_key(run_id, path);
        {
            let state = self
                .shared
                .state
                .lock()
                .map_err(|_| CheckpointError::LockPoisoned)?;
            if let Some(cp) = state.states.get(&key) {
                return Ok(Selection::Found(cp.clone()));
            }
        }

        let Some(snapshot) = self.load_snapshot()? else {
            let state = self
                .shared
                .state
                .lock()
                .map_err(|_| CheckpointError::LockPoisoned)?;
            return Ok(if state.states.is_empty() {
                Selection::ColdStart
            } else {
                Selection::Missing
            });
        };

        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| CheckpointError::LockPoisoned)?;
        state.merge(snapshot);
        Ok(state
            .states
            .get(&key)
            .cloned()
            .map_or(Selection::Missing, Selection::Found))
    }

    fn flush(&self) -> Result<()> {
        self.shared.flush()
    }

    fn shutdown(&self) {
        let flusher = match self.flusher.lock() {
            Ok(mut f) => f.take(),
            Err(_) => None,
        };
        let Some(flusher) = flusher else {
            return;
        };

        drop(flusher.shutdown_tx);
        if flusher.handle.join().is_err() {
            tracing::error!("Checkpoint flusher thread panicked");
        }
        if let Err(e) = self.shared.flush_if_dirty() {
            tracing::warn!("Final checkpoint flush failed: {}", e);
        }
    }
}

impl Drop for FileCheckpointStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for FileCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCheckpointStore")
            .field("path", &self.shared.path)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Without a flusher thread the store degrades to synchronous writes.
fn spawn_flusher(shared: Arc<Shared>, interval: Duration) -> Option<Flusher> {
    let (shutdown_tx, shutdown_rx): (Sender<()>, Receiver<()>) = bounded(0);
    let spawned = std::thread::Builder::new()
        .name("checkpoint-flusher".into())
        .spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        if let Err(e) = shared.flush_if_dirty() {
                            tracing::warn!("Checkpoint flush failed: {}", e);
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            }
            tracing::debug!("Checkpoint flusher exiting");
        });

    match spawned {
        Ok(handle) => Some(Flusher {
            shutdown_tx,
            handle,
        }),
        Err(e) => {
            tracing::warn!("Failed to spawn checkpoint flusher, writing synchronously: {}", e);
            None
        }
    }
}

/// Move an undecodable snapshot out of the way, keeping it for inspection.
fn set_aside(path: &Path) {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    if let Err(e) = fs::rename(path, &aside) {
        tracing::warn!("Could not move {} aside: {}", path.display(), e);
    }
}

fn encode_snapshot(states: &BTreeMap<String, Checkpoint>) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(states).map_err(CheckpointError::Encode)
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).map_err(|e| CheckpointError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| CheckpointError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| CheckpointError::io(path, e))
}
