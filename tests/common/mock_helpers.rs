//! Mock emitters and scripted adaptors

use changeflow::events::{Emitter, Event};
use changeflow::message::Message;
use changeflow::pipeline::{Adaptor, Pipe, PipelineError, PipelineResult};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::builders::message;

// ==================== Emitter ====================

/// Shared view of everything a [`RecordingEmitter`] delivered.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
    stops: Arc<AtomicUsize>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    /// Message count of the last metrics event for `path`
    pub fn last_metrics(&self, path: &str) -> Option<u64> {
        self.events().iter().rev().find_map(|e| match e {
            Event::Metrics {
                path: p,
                message_count,
                ..
            } if p == path => Some(*message_count),
            _ => None,
        })
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Emitter that stores every delivered event in an [`EventLog`]
pub struct RecordingEmitter {
    log: EventLog,
    events: Option<Receiver<Event>>,
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl RecordingEmitter {
    pub fn new() -> (Self, EventLog) {
        let log = EventLog::default();
        (
            Self {
                log: log.clone(),
                events: None,
                worker: None,
            },
            log,
        )
    }
}

impl Emitter for RecordingEmitter {
    fn init(&mut self, events: Receiver<Event>) {
        self.events = Some(events);
    }

    fn start(&mut self) {
        let Some(events) = self.events.take() else {
            return;
        };
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let log = self.log.events.clone();
        let handle = std::thread::spawn(move || loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => log.lock().unwrap().push(event),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => {
                    log.lock().unwrap().extend(events.try_iter());
                    break;
                }
            }
        });
        self.worker = Some((stop_tx, handle));
    }

    fn stop(&mut self) {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        if let Some((stop_tx, handle)) = self.worker.take() {
            drop(stop_tx);
            handle.join().unwrap();
        }
    }
}

// ==================== Adaptors ====================

/// Source sending `count` messages (`_id` 0..count), with optional failures
#[derive(Default)]
pub struct ScriptedSource {
    count: i64,
    record_error_at: Option<i64>,
    fail_after: Option<String>,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(count: i64) -> Self {
        Self {
            count,
            ..Default::default()
        }
    }

    /// Report a record error instead of sending message `index`
    pub fn record_error_at(mut self, index: i64) -> Self {
        self.record_error_at = Some(index);
        self
    }

    /// Return a fatal error after sending everything
    pub fn fail_after(mut self, message: &str) -> Self {
        self.fail_after = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Adaptor for ScriptedSource {
    fn kind(&self) -> &str {
        "scripted"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        for i in 0..self.count {
            if pipe.is_stopped() {
                break;
            }
            let msg = message(i);
            if self.record_error_at == Some(i) {
                pipe.report_record_error(msg.document().map(serde_json::Value::Object), "rejected");
                continue;
            }
            pipe.send(msg)?;
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
        }
        match &self.fail_after {
            Some(reason) => Err(PipelineError::node(pipe.path(), reason.clone())),
            None => Ok(()),
        }
    }
}

/// Sink collecting every message it receives
#[derive(Clone, Default)]
pub struct CollectSink {
    received: Arc<Mutex<Vec<Message>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.received().iter().map(Message::id_as_string).collect()
    }
}

impl Adaptor for CollectSink {
    fn kind(&self) -> &str {
        "collect"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        pipe.listen(|msg| {
            pipe.record(&msg);
            self.received.lock().unwrap().push(msg);
            Ok(None)
        })
    }
}

/// Sink failing fatally, counting stop calls
#[derive(Clone, Default)]
pub struct FailingSink {
    at_start: bool,
    stops: Arc<AtomicUsize>,
}

impl FailingSink {
    /// Fail on the first message
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail before reading anything
    pub fn at_start() -> Self {
        Self {
            at_start: true,
            ..Default::default()
        }
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Adaptor for FailingSink {
    fn kind(&self) -> &str {
        "failing"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        if self.at_start || pipe.recv().is_some() {
            return Err(PipelineError::node(pipe.path(), "sink unavailable"));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that takes one message and then gives up, by panicking or by
/// returning early
pub struct ReadsOnce {
    panic: bool,
}

impl ReadsOnce {
    pub fn then_panic() -> Self {
        Self { panic: true }
    }

    pub fn then_return() -> Self {
        Self { panic: false }
    }
}

impl Adaptor for ReadsOnce {
    fn kind(&self) -> &str {
        "reads-once"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        let _ = pipe.recv();
        if self.panic {
            panic!("sink crashed after one message");
        }
        Ok(())
    }
}

/// Adaptor blocking until stopped, counting stop calls
#[derive(Clone, Default)]
pub struct UntilStopped {
    stops: Arc<AtomicUsize>,
}

impl UntilStopped {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Adaptor for UntilStopped {
    fn kind(&self) -> &str {
        "until-stopped"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        let _ = pipe.stop_signal().receiver().recv();
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Adaptor ignoring stop requests for a fixed time
pub struct Hung(pub Duration);

impl Adaptor for Hung {
    fn kind(&self) -> &str {
        "hung"
    }

    fn start(&self, _pipe: &Pipe) -> PipelineResult<()> {
        std::thread::sleep(self.0);
        Ok(())
    }
}
