//! Tree-shaped pipeline execution engine.
//!
//! Change records flow from a source node down through transforms to sinks.
//! Every node runs one [`Adaptor`] and owns a [`Pipe`] connecting it to its
//! parent and children.
//!
//! # Architecture
//!
//! ```text
//! [FixtureSource] ──► [Filter] ──► [LogSink]
//!                 └──► [LogSink]
//!
//!   errors  ──► triage ──► events ──► Emitter
//!   metrics ticker ─┘
//!   checkpoint ticker ──► CheckpointStore
//! ```
//!
//! # Design
//!
//! - **Downward ownership**: nodes own their children, paths are passed down.
//! - **One thread per node** during a run, scoped to the root's `start`.
//! - **Cooperative stop**: a broadcast [`StopSignal`] interrupts blocking
//!   receives and sends; stop is bounded by a timeout.
//! - **Level-order harvesting**: tickers visit every node exactly once.

pub mod error;
pub mod executor;
pub mod node;
pub mod nodes;
pub mod pipe;
pub mod signal;

pub use error::{PipelineError, PipelineResult, RecordError};
pub use executor::{Pipeline, PipelineBuilder, PipelineState, VERSION};
pub use node::{Adaptor, InitContext, Node};
pub use pipe::{Pipe, PipeState};
pub use signal::StopSignal;
