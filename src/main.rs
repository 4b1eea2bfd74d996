//! changeflow - Main Entry Point
//!
//! Runs a demo pipeline: a fixture source feeding a filtered and an
//! unfiltered log sink. Usage: `changeflow [config.toml]`.

use anyhow::Context;
use changeflow::checkpoint::CheckpointStore;
use changeflow::config::EngineConfig;
use changeflow::events::LogEmitter;
use changeflow::message::{Document, Op};
use changeflow::pipeline::nodes::{Filter, FixtureSource, LogSink};
use changeflow::pipeline::{Node, Pipeline};
use serde_json::json;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,changeflow=debug"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "changeflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn demo_documents() -> Vec<Document> {
    let docs = [
        json!({"_id": {"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"}, "customer": "ada", "total": 42.5}),
        json!({"_id": {"$oid": "65a1f0c2e4b0a1b2c3d4e5f7"}, "customer": "grace", "total": 17.0}),
        json!({"id": 3, "customer": "linus", "total": 99.9}),
        json!({"customer": "anonymous", "total": 1.0}),
    ];
    docs.into_iter()
        .filter_map(|doc| doc.as_object().cloned())
        .collect()
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config = match &config_path {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => EngineConfig::default(),
    };
    let _guard = init_logging(config.log_dir.as_deref());

    tracing::info!("Starting changeflow {}", changeflow::pipeline::VERSION);

    let settings = config.pipeline_settings();
    let store = config.checkpoint_store();
    let resume = store
        .select(&settings.run_id, "orders")
        .context("reading checkpoint")?
        .into_checkpoint();
    if let Some(checkpoint) = &resume {
        tracing::info!("Resuming after {} ({})", checkpoint.id, checkpoint.timestamp);
    }

    let root = Node::new(
        "orders",
        FixtureSource::new("shop.orders", demo_documents())
            .with_op(Op::Insert)
            .resume_after(resume),
    )
    .with_child(
        Node::new("inserts", Filter::new().allow_op(Op::Insert))
            .with_child(Node::new("audit", LogSink::new().require_id())),
    )
    .with_child(Node::new("console", LogSink::new()));

    let pipeline = Pipeline::builder(root)
        .settings(settings)
        .emitter(LogEmitter::new())
        .checkpoint_store(store)
        .build()
        .context("building pipeline")?;

    pipeline.run().context("running pipeline")?;
    tracing::info!("Shutting down...");
    Ok(())
}
