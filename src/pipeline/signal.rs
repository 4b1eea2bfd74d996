//! Broadcast stop signal.
//!
//! A [`StopSignal`] can be polled (`is_stopped`) or waited on inside a
//! crossbeam `select!` via [`StopSignal::receiver`]: triggering it drops the
//! only sender, which disconnects every receiver at once.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Inner {
    stopped: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Cloneable one-shot stop flag.
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Trigger the signal. Returns `true` only for the first call.
    pub fn trigger(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Ok(mut tx) = self.inner.tx.lock() {
            tx.take();
        }
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Receiver that becomes disconnected (and therefore always ready) once
    /// the signal fires. Nothing is ever sent on it.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
