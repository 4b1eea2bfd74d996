//! LogSink: terminal node that logs every message it receives.

use crate::pipeline::error::{PipelineResult, RecordError};
use crate::pipeline::node::Adaptor;
use crate::pipeline::pipe::Pipe;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct LogSink {
    require_id: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject messages without an identity as record errors.
    pub fn require_id(mut self) -> Self {
        self.require_id = true;
        self
    }
}

impl Adaptor for LogSink {
    fn kind(&self) -> &str {
        "log"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        pipe.listen(|msg| {
            if self.require_id && msg.id().is_none() {
                let record = msg.document().map(Value::Object);
                return Err(RecordError::new(pipe.path(), record, "message has no identity").into());
            }
            tracing::info!(
                target: "changeflow::sink",
                path = pipe.path(),
                op = %msg.op,
                namespace = %msg.namespace,
                id = %msg.id_as_string(),
                timestamp = msg.timestamp,
                "message"
            );
            pipe.record(&msg);
            Ok(None)
        })
    }
}
