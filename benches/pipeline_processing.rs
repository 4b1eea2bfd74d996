//! Benchmarks for pipeline hot paths
//!
//! Run with: cargo bench

use changeflow::message::{Message, Op};
use changeflow::pipeline::{Adaptor, Node, Pipe, Pipeline, PipelineResult};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

struct Burst(u64);

impl Adaptor for Burst {
    fn kind(&self) -> &str {
        "burst"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        for i in 0..self.0 {
            let doc = json!({"_id": i, "payload": "x"}).as_object().cloned();
            pipe.send(Message::new(Op::Insert, "bench.items", doc))?;
        }
        Ok(())
    }
}

struct Discard;

impl Adaptor for Discard {
    fn kind(&self) -> &str {
        "discard"
    }

    fn start(&self, pipe: &Pipe) -> PipelineResult<()> {
        pipe.listen(|msg| {
            pipe.record(&msg);
            Ok(None)
        })
    }
}

fn wide_tree(fanout: usize, depth: usize) -> Node {
    let mut node = Node::new(format!("d{depth}"), Discard);
    if depth > 0 {
        for _ in 0..fanout {
            node.add_child(wide_tree(fanout, depth - 1));
        }
    }
    node
}

fn bench_message_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("message");
    let doc = json!({"_id": {"$oid": "65a1f0c2e4b0a1b2c3d4e5f6"}, "name": "ada", "n": 1})
        .as_object()
        .cloned();

    group.bench_function("new", |b| {
        b.iter(|| Message::new(Op::Update, "bench.items", black_box(doc.clone())))
    });

    let msg = Message::new(Op::Update, "bench.items", doc);
    group.bench_function("document_with_id", |b| {
        b.iter(|| black_box(&msg).document_with_id("id"))
    });
    group.bench_function("id_as_string", |b| b.iter(|| black_box(&msg).id_as_string()));
    group.finish();
}

fn bench_breadth_first(c: &mut Criterion) {
    let mut group = c.benchmark_group("visit_breadth_first");
    for (fanout, depth) in [(2, 6), (4, 4), (8, 3)] {
        let tree = wide_tree(fanout, depth);
        let nodes = tree.len();
        group.throughput(Throughput::Elements(nodes as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{fanout}x{depth}")),
            &tree,
            |b, tree| {
                b.iter(|| {
                    let mut visited = 0usize;
                    tree.visit_breadth_first(|_| visited += 1);
                    black_box(visited)
                })
            },
        );
    }
    group.finish();
}

fn bench_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_run");
    group.sample_size(10);
    for count in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let root = Node::new("source", Burst(count)).with_child(Node::new("sink", Discard));
                let pipeline = Pipeline::builder(root).run_id("bench").build().ok();
                if let Some(pipeline) = pipeline {
                    let _ = pipeline.run();
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_message_envelope, bench_breadth_first, bench_run);
criterion_main!(benches);
