//! Per-node communication bus.
//!
//! Every initialized [`Node`](crate::pipeline::Node) owns exactly one
//! [`Pipe`]. The pipe carries:
//!
//! - the data channel from the parent (`input`) and one data channel to
//!   each child (`outputs`),
//! - the shared telemetry event channel and error channel,
//! - a [`PipeState`] with the message counter and the "last known
//!   checkpoint" slot, which the pipeline's tickers read concurrently,
//! - the node's [`StopSignal`].

use crate::config::{ChannelPolicy, Overflow};
use crate::message::Message;
use crate::pipeline::error::{PipelineError, PipelineResult, RecordError};
use crate::pipeline::signal::StopSignal;
use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// Counters and checkpoint slot shared between a node and the pipeline.
#[derive(Debug, Default)]
pub struct PipeState {
    message_count: AtomicU64,
    dropped_count: AtomicU64,
    last_known: Mutex<Option<Message>>,
}

impl PipeState {
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Copy of the last message this node reported.
    pub fn last_known(&self) -> Option<Message> {
        self.last_known.lock().ok().and_then(|slot| slot.clone())
    }

    fn record(&self, msg: &Message) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut slot) = self.last_known.lock() {
            *slot = Some(msg.clone());
        }
    }
}

/// Communication bus owned by one node.
#[derive(Debug)]
pub struct Pipe {
    path: String,
    input: Mutex<Option<Receiver<Message>>>,
    outputs: RwLock<Vec<Sender<Message>>>,
    data_policy: ChannelPolicy,
    errors: Sender<PipelineError>,
    state: PipeState,
    stop: StopSignal,
}

impl Pipe {
    pub(crate) fn new(
        path: String,
        input: Option<Receiver<Message>>,
        data_policy: ChannelPolicy,
        errors: Sender<PipelineError>,
    ) -> Self {
        Self {
            path,
            input: Mutex::new(input),
            outputs: RwLock::new(Vec::new()),
            data_policy,
            errors,
            state: PipeState::default(),
            stop: StopSignal::new(),
        }
    }

    /// Open a data channel to a new child, returning the child's end.
    pub(crate) fn open_output(&self) -> Receiver<Message> {
        let (tx, rx) = self.data_policy.channel();
        if let Ok(mut outputs) = self.outputs.write() {
            outputs.push(tx);
        }
        rx
    }

    /// Drop all outgoing senders; children drain what is buffered and then
    /// see end-of-stream.
    pub(crate) fn close_outputs(&self) {
        if let Ok(mut outputs) = self.outputs.write() {
            outputs.clear();
        }
    }

    /// Drop the parent's data channel. A parent still sending to this node
    /// then sees a disconnect instead of blocking on a full buffer.
    pub(crate) fn close_input(&self) {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn errors(&self) -> &Sender<PipelineError> {
        &self.errors
    }

    /// Path of the owning node in the tree (`root/child/...`).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> &PipeState {
        &self.state
    }

    pub fn message_count(&self) -> u64 {
        self.state.message_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.state.dropped_count()
    }

    pub fn last_known(&self) -> Option<Message> {
        self.state.last_known()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub(crate) fn stop(&self) {
        self.stop.trigger();
    }

    /// Count `msg` as processed and make it this node's last known position,
    /// without forwarding it.
    pub fn record(&self, msg: &Message) {
        self.state.record(msg);
    }

    /// Forward a copy of `msg` to every child, then record it.
    ///
    /// With [`Overflow::Block`] a full child channel blocks until there is
    /// room or the node is stopped; with [`Overflow::Drop`] the message is
    /// dropped for that child and counted. A send cut short by a stop is not
    /// recorded, so the checkpoint never moves past an undelivered message.
    pub fn send(&self, msg: Message) -> PipelineResult<()> {
        let outputs = self
            .outputs
            .read()
            .map_err(|_| PipelineError::node(&self.path, "output lock poisoned"))?;
        for tx in outputs.iter() {
            if !self.send_to(tx, msg.clone())? {
                tracing::debug!("Send interrupted by stop at {}", self.path);
                return Ok(());
            }
        }
        self.state.record(&msg);
        Ok(())
    }

    /// `Ok(false)` if the stop signal interrupted the send.
    fn send_to(&self, tx: &Sender<Message>, msg: Message) -> PipelineResult<bool> {
        let delivered = match self.data_policy.overflow {
            Overflow::Drop => match tx.try_send(msg) {
                Ok(()) => return Ok(true),
                Err(TrySendError::Full(_)) => {
                    self.state.dropped_count.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Data channel full at {}, message dropped", self.path);
                    return Ok(true);
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            Overflow::Block => {
                select! {
                    send(tx, msg) -> res => res.is_ok(),
                    recv(self.stop.receiver()) -> _ => return Ok(false),
                }
            }
        };
        match (delivered, self.is_stopped()) {
            (true, _) => Ok(true),
            // A child closes its input when it stops; that is not a failure.
            (false, true) => Ok(false),
            (false, false) => Err(PipelineError::ChannelSend(self.path.clone())),
        }
    }

    /// Receive the next message from the parent.
    ///
    /// Returns `None` once the parent closed the channel or this node was
    /// stopped. Root nodes have no input and always return `None`.
    pub fn recv(&self) -> Option<Message> {
        let input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
        let input = input.as_ref()?;
        if self.is_stopped() {
            return None;
        }
        select! {
            recv(input) -> msg => msg.ok(),
            recv(self.stop.receiver()) -> _ => None,
        }
    }

    /// Process every incoming message with `handler` until end-of-stream or
    /// stop. A message returned by the handler is sent on to the children.
    ///
    /// A record-level error from the handler is reported and processing
    /// continues; any other error ends the loop and is returned.
    pub fn listen<F>(&self, mut handler: F) -> PipelineResult<()>
    where
        F: FnMut(Message) -> PipelineResult<Option<Message>>,
    {
        while let Some(msg) = self.recv() {
            match handler(msg) {
                Ok(Some(out)) => self.send(out)?,
                Ok(None) => {}
                Err(PipelineError::Record(e)) => self.report(PipelineError::Record(e)),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Report an error to the pipeline's triage thread.
    pub fn report(&self, err: PipelineError) {
        if let Err(e) = self.errors.send(err) {
            tracing::warn!("Error channel closed, dropping error from {}: {}", self.path, e.0);
        }
    }

    /// Report a non-fatal failure of a single record.
    pub fn report_record_error(&self, record: Option<Value>, message: impl Into<String>) {
        self.report(RecordError::new(self.path.clone(), record, message).into());
    }
}
