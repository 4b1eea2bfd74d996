//! FixtureSource: emits a fixed list of documents.
//!
//! Useful for demos and tests. Each document becomes one [`Message`] with the
//! configured op and namespace. Timestamps are `base + index`, where `base`
//! defaults to the current unix time. A [`Checkpoint`] given with
//! [`FixtureSource::resume_after`] skips every document up to and including
//! the one whose identity matches it.

use crate::checkpoint::Checkpoint;
use crate::message::{Document, Message, Op};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{Adaptor, InitContext};
use crate::pipeline::pipe::Pipe;
use crossbeam_channel::select;
use std::time::Duration;

pub struct FixtureSource {
    namespace: String,
    op: Op,
    documents: Vec<Document>,
    base_timestamp: Option<i64>,
    delay: Option<Duration>,
    resume_after: Option<Checkpoint>,
}

impl FixtureSource {
    pub fn new(namespace: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            namespace: namespace.into(),
            op: Op::Insert,
            documents,
            base_timestamp: None,
            delay: None,
            resume_after: None,
        }
    }

    pub fn with_op(mut self, op: Op) -> Self {
        self.op = op;
        self
    }

    /// Stamp messages with `base + index` instead of the wall clock.
    pub fn with_base_timestamp(mut self, base: i64) -> Self {
        self.base_timestamp = Some(base);
        self
    }

    /// Pause between messages. The pause is cut short by a stop.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn resume_after(mut self, checkpoint: Option<Checkpoint>) -> Self {
        self.resume_after = checkpoint;
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Index of the first document still to emit.
    fn first_pending(&self) -> usize {
        let Some(checkpoint) = &self.resume_after else {
            return 0;
        };
        self.documents
            .iter()
            .position(|doc| {
                Message::new(self.op, self.namespace.as_str(), Some(doc.clone())).id_as_string()
                    == checkpoint.id
            })
            .map_or(0, |i| i + 1)
    }
}

impl Adaptor for FixtureSource {
    fn kind(&self) -> &str {
        "fixture"
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> PipelineResult<()> {
        if self.base_timestamp.is_none() {
            self.base_timestamp = Some(crate::events::now());
        }
        tracing::debug!(
            "Fixture source {} holds {} documents for {}",
            ctx.path,
            self.documents.len(),
            self.namespace
        );
        Ok(())
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        let base = self.base_timestamp.unwrap_or_else(crate::events::now);
        let first = self.first_pending();
        if first > 0 {
            tracing::info!("{} resuming after {} documents", pipe.path(), first);
        }

        for (index, doc) in self.documents.iter().enumerate().skip(first) {
            if pipe.is_stopped() {
                break;
            }
            let msg = Message::new(self.op, self.namespace.as_str(), Some(doc.clone()))
                .with_timestamp(base + index as i64);
            pipe.send(msg)?;

            if let Some(delay) = self.delay {
                select! {
                    recv(pipe.stop_signal().receiver()) -> _ => break,
                    default(delay) => {}
                }
            }
        }
        Ok(())
    }
}
