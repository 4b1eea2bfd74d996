//! # changeflow: change-record pipeline engine
//!
//! Moves change records from a source through zero or more transforms to one
//! or more sinks, arranged as a tree of nodes. The engine wires the tree
//! together with channels, drives startup and cooperative shutdown, harvests
//! per-node metrics and checkpoints on a timer, and sorts failures into
//! per-record (reported, non-fatal) and fatal (pipeline stops).
//!
//! ## Architecture
//!
//! - **Message**: envelope for one change record, with identity extraction
//! - **Pipeline**: node tree, error triage, metrics and checkpoint tickers
//! - **Checkpoint**: durable last-processed position per node path
//! - **Events**: telemetry model and emitters
//! - **Communication**: crossbeam channels between std threads
//!
//! ## Example
//!
//! ```ignore
//! use changeflow::pipeline::nodes::{FixtureSource, LogSink};
//! use changeflow::pipeline::{Node, Pipeline};
//!
//! let root = Node::new("source", FixtureSource::new("shop.orders", documents))
//!     .with_child(Node::new("sink", LogSink::new()));
//!
//! let pipeline = Pipeline::builder(root).run_id("orders").build()?;
//! pipeline.run()?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod pipeline;

pub use error::{ChangeflowError, Result};
pub use message::{Document, Message, Op};
pub use pipeline::{Adaptor, Node, Pipe, Pipeline, PipelineBuilder, PipelineError};
