//! Benchmarks for port graph operations
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use portflow::{BankRef, FlowGraph, Metadata, MetadataRule, PortId};
use std::any::Any;

#[derive(Debug, Clone)]
struct RowsMeta;

impl Metadata for RowsMeta {
    fn kind(&self) -> &'static str {
        "rows"
    }

    fn clone_md(&self) -> Box<dyn Metadata> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Build a root-level chain of `size` operators wired head to tail. With
/// `seeded` the head carries a metadata rule so an inference pass has
/// something to propagate.
fn build_chain(size: usize, seeded: bool) -> FlowGraph {
    let mut graph = FlowGraph::new();
    let root = graph.root();
    let mut upstream: Option<PortId> = None;
    for i in 0..size {
        let name = format!("Op {}", i + 1);
        let op = graph.add_operator(root, &name).unwrap();
        if let Some(from) = upstream {
            let (input, output) = graph.create_pass_through_port(op, "data").unwrap();
            graph.connect(from, input).unwrap();
            upstream = Some(output);
        } else {
            let out = graph.create_port(BankRef::OpOutputs(op), "out").unwrap();
            if seeded {
                graph
                    .add_rule(op, MetadataRule::generate_new(out, Box::new(RowsMeta)))
                    .unwrap();
            }
            upstream = Some(out);
        }
    }
    graph
}

fn bench_wiring_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("wiring_churn");

    for size in [8usize, 32, 128].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(
            BenchmarkId::new("connect_disconnect", size),
            size,
            |b, &size| {
                b.iter(|| {
                    let mut graph = FlowGraph::new();
                    let root = graph.root();
                    let producer = graph.add_operator(root, "Producer").unwrap();
                    let consumer = graph.add_operator(root, "Consumer").unwrap();
                    let ext = graph
                        .add_single_extender("input", BankRef::OpInputs(consumer))
                        .unwrap();
                    graph.start_extender(ext).unwrap();
                    let mut sources = Vec::with_capacity(size);
                    for i in 0..size {
                        let name = format!("src {}", i + 1);
                        sources.push(
                            graph
                                .create_port(BankRef::OpOutputs(producer), &name)
                                .unwrap(),
                        );
                    }
                    for &source in &sources {
                        let spare = graph
                            .extender(ext)
                            .unwrap()
                            .managed_ports()
                            .into_iter()
                            .find(|&p| graph.port(p).is_some_and(|slot| slot.is_free()))
                            .unwrap();
                        graph.connect(source, spare).unwrap();
                    }
                    for &source in &sources {
                        graph.disconnect(source).unwrap();
                    }
                    black_box(graph.port_count())
                });
            },
        );
    }

    group.finish();
}

fn bench_metadata_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata_pass");

    for size in [4usize, 16, 64].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("infer_chain", size), size, |b, &size| {
            let mut graph = build_chain(size, true);
            b.iter(|| black_box(graph.infer_metadata().stats().operators_visited));
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [4usize, 16, 64].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("wiring_snapshot", size), size, |b, &size| {
            let graph = build_chain(size, false);
            b.iter(|| {
                let snapshot = graph.snapshot(graph.root()).unwrap();
                black_box(snapshot.connections.len())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_wiring_churn,
    bench_metadata_pass,
    bench_snapshot,
);

criterion_main!(benches);
