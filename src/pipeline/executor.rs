//! Pipeline executor: owns one initialized tree for one run.
//!
//! Besides the caller's thread (which drives the root node in [`Pipeline::run`]),
//! a pipeline runs three background workers:
//!
//! 1. **Triage** receives every error reported by any node. Record-level
//!    errors become [`Event::Error`] telemetry; anything else is fatal and
//!    stops the pipeline.
//! 2. **Metrics ticker** walks the tree every `metrics_interval` and emits
//!    one [`Event::Metrics`] per node.
//! 3. **Checkpoint ticker** walks the tree every `checkpoint_interval` and
//!    saves each node's last known message to the checkpoint store.
//!
//! All workers park on `select!` over their input and the pipeline's
//! shutdown signal, so `stop` only has to trigger the signal and join them.

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::config::{ChannelPolicy, Overflow, PipelineSettings};
use crate::events::{Emitter, Endpoint, Event, NoopEmitter};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Node, TreeContext};
use crate::pipeline::signal::StopSignal;
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Version reported in boot and exit events.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lifecycle of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Created => "created",
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Builder for a [`Pipeline`] with non-default settings.
pub struct PipelineBuilder {
    root: Node,
    emitter: Option<Box<dyn Emitter>>,
    store: Option<Arc<dyn CheckpointStore>>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    pub fn new(root: Node) -> Self {
        Self {
            root,
            emitter: None,
            store: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn emitter(mut self, emitter: impl Emitter + 'static) -> Self {
        self.emitter = Some(Box::new(emitter));
        self
    }

    pub fn boxed_emitter(mut self, emitter: Box<dyn Emitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace all settings at once.
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.settings.run_id = run_id.into();
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.settings.metrics_interval = interval;
        self
    }

    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.settings.checkpoint_interval = interval;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.settings.stop_timeout = timeout;
        self
    }

    pub fn data_channel(mut self, policy: ChannelPolicy) -> Self {
        self.settings.data_channel = policy;
        self
    }

    pub fn event_channel(mut self, policy: ChannelPolicy) -> Self {
        self.settings.event_channel = policy;
        self
    }

    /// Initialize the tree, bind the emitter and spawn the workers.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let PipelineBuilder {
            mut root,
            emitter,
            store,
            settings,
        } = self;
        validate(&settings)?;

        let mut emitter = emitter.unwrap_or_else(|| Box::new(NoopEmitter::new()));
        let store = store.unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));

        let (errors_tx, errors_rx) = unbounded();
        root.init(&TreeContext {
            metrics_interval: settings.metrics_interval,
            data_policy: settings.data_channel,
            errors: errors_tx,
        })?;

        let (events_tx, events_rx) = settings.event_channel.channel();
        emitter.init(events_rx);

        tracing::info!(
            "Pipeline {} initialized with {} nodes",
            settings.run_id,
            root.len()
        );

        let shared = Arc::new(Shared {
            settings,
            root,
            emitter: Mutex::new(emitter),
            store,
            events: events_tx,
            state: Mutex::new(PipelineState::Initialized),
            shutdown: StopSignal::new(),
            fatal: Mutex::new(None),
            running: Mutex::new(false),
            run_done: Condvar::new(),
            stop_started: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
        });
        let pipeline = Pipeline {
            shared,
            workers: Mutex::new(Vec::new()),
        };

        // If a spawn fails, dropping `pipeline` stops the workers already running.
        pipeline.spawn_worker("triage", move |shared| triage_loop(shared, errors_rx))?;
        let metrics_interval = pipeline.shared.settings.metrics_interval;
        pipeline.spawn_worker("metrics", move |shared| {
            ticker_loop(shared, metrics_interval, Shared::emit_metrics)
        })?;
        let checkpoint_interval = pipeline.shared.settings.checkpoint_interval;
        pipeline.spawn_worker("checkpoint", move |shared| {
            ticker_loop(shared, checkpoint_interval, Shared::save_checkpoints)
        })?;

        if let Ok(mut emitter) = pipeline.shared.emitter.lock() {
            emitter.start();
        }
        Ok(pipeline)
    }
}

fn validate(settings: &PipelineSettings) -> PipelineResult<()> {
    if settings.metrics_interval.is_zero() {
        return Err(PipelineError::InvalidSettings("metrics interval must be positive".into()));
    }
    if settings.checkpoint_interval.is_zero() {
        return Err(PipelineError::InvalidSettings("checkpoint interval must be positive".into()));
    }
    for (name, policy) in [("data", settings.data_channel), ("event", settings.event_channel)] {
        if policy.capacity == Some(0) {
            return Err(PipelineError::InvalidSettings(format!(
                "{} channel capacity must be positive",
                name
            )));
        }
    }
    Ok(())
}

/// State shared between the caller's thread and the workers.
struct Shared {
    settings: PipelineSettings,
    root: Node,
    emitter: Mutex<Box<dyn Emitter>>,
    store: Arc<dyn CheckpointStore>,
    events: Sender<Event>,
    state: Mutex<PipelineState>,
    shutdown: StopSignal,
    fatal: Mutex<Option<PipelineError>>,
    /// True while `run` is inside the root's `start`.
    running: Mutex<bool>,
    run_done: Condvar,
    stop_started: AtomicBool,
    /// Set when a stop gave up waiting for the tree.
    timed_out: AtomicBool,
}

impl Shared {
    fn state(&self) -> PipelineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PipelineState::Stopped)
    }

    fn set_state(&self, next: PipelineState) {
        if let Ok(mut state) = self.state.lock() {
            tracing::debug!("Pipeline {}: {} -> {}", self.settings.run_id, *state, next);
            *state = next;
        }
    }

    fn begin_run(&self) -> PipelineResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PipelineError::node(self.root.path(), "state lock poisoned"))?;
        if *state != PipelineState::Initialized {
            return Err(PipelineError::InvalidState {
                expected: PipelineState::Initialized,
                actual: *state,
            });
        }
        *state = PipelineState::Running;
        if let Ok(mut running) = self.running.lock() {
            *running = true;
        }
        Ok(())
    }

    fn end_run(&self) {
        if let Ok(mut running) = self.running.lock() {
            *running = false;
        }
        self.run_done.notify_all();
    }

    /// Wait until `run` has left the root's `start`.
    fn wait_for_run(&self, timeout: Duration) -> PipelineResult<()> {
        let Ok(running) = self.running.lock() else {
            return Ok(());
        };
        match self.run_done.wait_timeout_while(running, timeout, |running| *running) {
            Ok((_, result)) if result.timed_out() => {
                tracing::warn!(
                    "Pipeline {} did not stop within {:?}",
                    self.settings.run_id,
                    timeout
                );
                self.timed_out.store(true, Ordering::SeqCst);
                Err(PipelineError::StopTimeout(timeout))
            }
            _ => Ok(()),
        }
    }

    fn emit(&self, event: Event) {
        let non_blocking = self.stop_started.load(Ordering::SeqCst)
            || self.settings.event_channel.overflow == Overflow::Drop;
        if non_blocking {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    tracing::warn!("Event channel full, dropping {} event", event.kind());
                }
                Err(TrySendError::Disconnected(event)) => {
                    tracing::debug!("Event channel closed, dropping {} event", event.kind());
                }
            }
        } else if let Err(e) = self.events.send(event) {
            tracing::debug!("Event channel closed, dropping {} event", e.0.kind());
        }
    }

    fn emit_metrics(&self) {
        self.root.visit_breadth_first(|node| {
            if let Some(pipe) = node.pipe() {
                self.emit(Event::metrics(pipe.path(), pipe.message_count()));
            }
        });
    }

    fn save_checkpoints(&self) {
        let run_id = &self.settings.run_id;
        self.root.visit_breadth_first(|node| {
            let Some(pipe) = node.pipe() else {
                return;
            };
            let Some(msg) = pipe.last_known() else {
                return;
            };
            match self.store.save(run_id, pipe.path(), &msg) {
                Ok(()) => tracing::trace!("Checkpoint {} at {}", msg.id_as_string(), pipe.path()),
                Err(e) => tracing::warn!("Failed to save checkpoint for {}: {}", pipe.path(), e),
            }
        });
    }

    fn triage(&self, err: PipelineError) {
        match err {
            PipelineError::Record(e) => {
                tracing::debug!("Record error at {}: {}", e.path, e.message);
                self.emit(Event::error(e.path, e.record, e.message));
            }
            fatal => {
                tracing::error!("Pipeline error: {}. Shutting down pipeline", fatal);
                if let Ok(mut slot) = self.fatal.lock() {
                    slot.get_or_insert(fatal);
                }
                if !self.stop_started.load(Ordering::SeqCst) {
                    tracing::debug!(
                        "Emitter of {} stops now; final metrics and exit events will be dropped",
                        self.settings.run_id
                    );
                }
                if let Err(e) = self.stop() {
                    tracing::warn!("Stop after fatal error: {}", e);
                }
            }
        }
    }

    fn take_fatal(&self) -> Option<PipelineError> {
        self.fatal.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Runs the stop sequence once; later calls return immediately.
    fn stop(&self) -> PipelineResult<()> {
        if self.stop_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Stopping pipeline {}", self.settings.run_id);
        self.set_state(PipelineState::Stopping);

        self.root.stop();
        if let Ok(mut emitter) = self.emitter.lock() {
            emitter.stop();
        }
        self.shutdown.trigger();
        self.store.shutdown();

        let result = self.wait_for_run(self.settings.stop_timeout);
        self.set_state(PipelineState::Stopped);
        result
    }
}

fn triage_loop(shared: Arc<Shared>, errors: Receiver<PipelineError>) {
    loop {
        select! {
            recv(errors) -> err => match err {
                Ok(err) => shared.triage(err),
                Err(_) => break,
            },
            recv(shared.shutdown.receiver()) -> _ => {
                for err in errors.try_iter() {
                    shared.triage(err);
                }
                break;
            }
        }
    }
    tracing::debug!("Triage worker for {} exited", shared.settings.run_id);
}

fn ticker_loop(shared: Arc<Shared>, interval: Duration, pass: fn(&Shared)) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => pass(&shared),
            recv(shared.shutdown.receiver()) -> _ => break,
        }
    }
}

/// One run of a processing tree.
pub struct Pipeline {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Build a pipeline with default settings apart from the metrics interval.
    pub fn new(
        root: Node,
        emitter: Box<dyn Emitter>,
        metrics_interval: Duration,
        store: Arc<dyn CheckpointStore>,
    ) -> PipelineResult<Self> {
        PipelineBuilder::new(root)
            .boxed_emitter(emitter)
            .checkpoint_store(store)
            .metrics_interval(metrics_interval)
            .build()
    }

    pub fn builder(root: Node) -> PipelineBuilder {
        PipelineBuilder::new(root)
    }

    fn spawn_worker<F>(&self, name: &str, work: F) -> PipelineResult<()>
    where
        F: FnOnce(Arc<Shared>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(format!("pipeline-{}", name))
            .spawn(move || work(shared))?;
        if let Ok(mut workers) = self.workers.lock() {
            workers.push(handle);
        }
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn run_id(&self) -> &str {
        &self.shared.settings.run_id
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.shared.settings
    }

    pub fn root(&self) -> &Node {
        &self.shared.root
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.shared.root.endpoints()
    }

    /// Run the tree to completion, then stop.
    ///
    /// Blocks until the root node is terminal. Whatever the outcome, a final
    /// metrics pass and checkpoint pass are made before the exit event.
    pub fn run(&self) -> PipelineResult<()> {
        self.shared.begin_run()?;
        let endpoints = self.endpoints();
        tracing::info!("Pipeline {} running\n{}", self.run_id(), self.shared.root);
        self.shared.emit(Event::boot(VERSION, endpoints.clone()));

        let result = self.shared.root.start();
        self.shared.end_run();
        if let Err(e) = &result {
            tracing::error!("Root node {} failed: {}", self.shared.root.path(), e);
        }

        // Retire the workers first: triage drains pending errors, and no tick
        // can land after the exit event.
        self.shared.shutdown.trigger();
        self.join_workers();

        self.shared.emit_metrics();
        self.shared.save_checkpoints();
        self.shared.emit(Event::exit(VERSION, endpoints));

        let stopped = self.stop();
        let fatal = self.shared.take_fatal();
        tracing::info!("Pipeline {} finished", self.run_id());
        // A failing child usually surfaces in the root as a lost channel;
        // the child's own error is the one worth returning.
        match (fatal, result) {
            (Some(fatal), _) => Err(fatal),
            (None, Err(e)) => Err(e),
            (None, Ok(())) if self.shared.timed_out.load(Ordering::SeqCst) => {
                Err(PipelineError::StopTimeout(self.shared.settings.stop_timeout))
            }
            (None, Ok(())) => stopped,
        }
    }

    /// Stop the pipeline and wait for the workers.
    ///
    /// Only the first call runs the stop sequence. Returns
    /// [`PipelineError::StopTimeout`] if a running tree did not finish within
    /// the configured timeout.
    pub fn stop(&self) -> PipelineResult<()> {
        let result = self.shared.stop();
        self.join_workers();
        result
    }

    fn join_workers(&self) {
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Pipeline worker panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Pipeline {} dropped: {}", self.run_id(), e);
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shared.root)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("run_id", &self.run_id())
            .field("state", &self.state())
            .field("root", &self.shared.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Selection;
    use crate::events::MockEmitter;
    use crate::message::{Message, Op};
    use crate::pipeline::node::Adaptor;
    use crate::pipeline::pipe::Pipe;
    use serde_json::json;

    struct Counter(u32);

    impl Adaptor for Counter {
        fn kind(&self) -> &str {
            "counter"
        }

        fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
            for i in 0..self.0 {
                let doc = json!({"_id": i}).as_object().cloned();
                pipe.send(Message::new(Op::Insert, "test.items", doc).with_timestamp(100 + i as i64))?;
            }
            Ok(())
        }
    }

    struct Drain;

    impl Adaptor for Drain {
        fn kind(&self) -> &str {
            "drain"
        }

        fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
            pipe.listen(|msg| {
                pipe.record(&msg);
                Ok(None)
            })
        }
    }

    fn tree(count: u32) -> Node {
        Node::new("source", Counter(count)).with_child(Node::new("sink", Drain))
    }

    fn emitter_expecting_one_run() -> MockEmitter {
        let mut emitter = MockEmitter::new();
        emitter.expect_init().times(1).return_const(());
        emitter.expect_start().times(1).return_const(());
        emitter.expect_stop().times(1).return_const(());
        emitter
    }

    #[test]
    fn test_emitter_lifecycle() {
        let pipeline = Pipeline::builder(tree(3))
            .emitter(emitter_expecting_one_run())
            .build()
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Initialized);

        pipeline.run().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        // Second stop is a no-op; the mock would fail on a second emitter stop.
        pipeline.stop().unwrap();
    }

    #[test]
    fn test_run_twice_is_invalid_state() {
        let pipeline = Pipeline::builder(tree(1)).build().unwrap();
        pipeline.run().unwrap();
        match pipeline.run() {
            Err(PipelineError::InvalidState { expected, actual }) => {
                assert_eq!(expected, PipelineState::Initialized);
                assert_eq!(actual, PipelineState::Stopped);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_final_checkpoint_pass_saves_every_node() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let pipeline = Pipeline::builder(tree(5))
            .checkpoint_store(store.clone())
            .run_id("test")
            .build()
            .unwrap();
        pipeline.run().unwrap();

        for path in ["source", "source/sink"] {
            match store.select("test", path).unwrap() {
                Selection::Found(cp) => {
                    assert_eq!(cp.id, "4");
                    assert_eq!(cp.timestamp, 104);
                }
                other => panic!("no checkpoint for {path}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = Pipeline::builder(tree(1))
            .metrics_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(PipelineError::InvalidSettings(_))));
    }

    #[test]
    fn test_init_failure_aborts_build() {
        let bad = Node::new("source", Counter(1)).with_child(Node::new("", Drain));
        assert!(matches!(
            Pipeline::builder(bad).build(),
            Err(PipelineError::NodeInit { .. })
        ));
    }

    #[test]
    fn test_drop_without_run_stops_workers() {
        let pipeline = Pipeline::new(
            tree(1),
            Box::new(emitter_expecting_one_run()),
            Duration::from_millis(10),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .unwrap();
        drop(pipeline);
    }

    #[test]
    fn test_display_renders_tree() {
        let pipeline = Pipeline::builder(tree(0)).build().unwrap();
        assert_eq!(pipeline.to_string(), "- source(counter)\n  - sink(drain)\n");
        assert_eq!(PipelineState::Stopping.to_string(), "stopping");
    }
}
