//! In-process emitters.

use crate::events::{Emitter, Event};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Background thread consuming the event channel.
struct DeliveryLoop {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl DeliveryLoop {
    fn spawn<F>(name: &str, events: Receiver<Event>, mut deliver: F) -> Option<Self>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(events) -> event => match event {
                            Ok(event) => deliver(event),
                            Err(_) => break,
                        },
                        recv(stop_rx) -> _ => {
                            // Deliver whatever was queued before the stop.
                            for event in events.try_iter() {
                                deliver(event);
                            }
                            break;
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => Some(Self { stop_tx, handle }),
            Err(e) => {
                tracing::error!("Failed to spawn {} thread: {}", name, e);
                None
            }
        }
    }

    fn stop(self) {
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            tracing::error!("Emitter delivery thread panicked");
        }
    }
}

/// Shared state of the emitters below.
#[derive(Default)]
struct EmitterCore {
    events: Option<Receiver<Event>>,
    delivery: Option<DeliveryLoop>,
    delivered: Arc<AtomicU64>,
}

impl EmitterCore {
    fn start<F>(&mut self, name: &str, deliver: F)
    where
        F: FnMut(Event) + Send + 'static,
    {
        if self.delivery.is_some() {
            return;
        }
        let Some(events) = self.events.take() else {
            tracing::warn!("{} started before init, no events will be delivered", name);
            return;
        };
        let delivered = self.delivered.clone();
        let mut deliver = deliver;
        self.delivery = DeliveryLoop::spawn(name, events, move |event| {
            deliver(event);
            delivered.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn stop(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            delivery.stop();
        }
    }
}

/// Emitter that consumes and discards every event.
#[derive(Default)]
pub struct NoopEmitter {
    core: EmitterCore,
}

impl NoopEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events consumed so far.
    pub fn delivered(&self) -> u64 {
        self.core.delivered.load(Ordering::Relaxed)
    }
}

impl Emitter for NoopEmitter {
    fn init(&mut self, events: Receiver<Event>) {
        self.core.events = Some(events);
    }

    fn start(&mut self) {
        self.core.start("noop-emitter", |_| {});
    }

    fn stop(&mut self) {
        self.core.stop();
    }
}

/// Emitter that writes every event to the `tracing` log.
#[derive(Default)]
pub struct LogEmitter {
    core: EmitterCore,
}

impl LogEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events logged so far.
    pub fn delivered(&self) -> u64 {
        self.core.delivered.load(Ordering::Relaxed)
    }
}

impl Emitter for LogEmitter {
    fn init(&mut self, events: Receiver<Event>) {
        self.core.events = Some(events);
    }

    fn start(&mut self) {
        self.core.start("log-emitter", log_event);
    }

    fn stop(&mut self) {
        self.core.stop();
    }
}

fn log_event(event: Event) {
    match &event {
        Event::Boot {
            version, endpoints, ..
        } => {
            tracing::info!(version = %version, nodes = endpoints.len(), "pipeline boot");
        }
        Event::Exit {
            version, endpoints, ..
        } => {
            tracing::info!(version = %version, nodes = endpoints.len(), "pipeline exit");
        }
        Event::Metrics {
            path,
            message_count,
            ..
        } => {
            tracing::info!(path = %path, message_count, "node metrics");
        }
        Event::Error {
            path,
            record,
            message,
            ..
        } => {
            let record = record.as_ref().map(|r| r.to_string()).unwrap_or_default();
            tracing::warn!(path = %path, record = %record, "record error: {}", message);
        }
    }
}
