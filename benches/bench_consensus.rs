use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use visionflow::core::{OutputsLookup, RuntimeContext, RuntimeParameters, VariablePool};
use visionflow::dsl::StepDefinition;
use visionflow::nodes::consensus::{resolve_batch_consensus, ConsensusParams};
use visionflow::{Detection, FakeIdGenerator, Segment, StepExecutorRegistry};

fn bench_runtime() -> Runtime {
    Runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// `count` detections on a grid, jittered per source so that boxes of the
/// same slot overlap across sources.
fn source(source_index: usize, count: usize) -> Vec<Detection> {
    (0..count)
        .map(|i| Detection {
            id: format!("s{}-{}", source_index, i),
            parent_id: "frame".to_string(),
            class_name: if i % 3 == 0 { "dog" } else { "car" }.to_string(),
            class_id: (i % 3) as i64,
            confidence: 0.5 + (i % 5) as f64 / 10.0,
            x: (i % 20) as f64 * 40.0 + source_index as f64,
            y: (i / 20) as f64 * 40.0,
            width: 30.0,
            height: 30.0,
        })
        .collect()
}

fn bench_resolve_consensus(c: &mut Criterion) {
    let ids = FakeIdGenerator::new("bench".to_string());
    for (sources, per_source) in [(2usize, 10usize), (3, 100), (5, 400)] {
        let detections: Vec<Vec<Detection>> =
            (0..sources).map(|s| source(s, per_source)).collect();
        let params = ConsensusParams::new(sources as u64);
        c.bench_with_input(
            BenchmarkId::new("resolve_batch_consensus", format!("{}x{}", sources, per_source)),
            &detections,
            |b, detections| {
                b.iter(|| black_box(resolve_batch_consensus(detections, &params, &ids)));
            },
        );
    }
}

fn bench_consensus_step(c: &mut Criterion) {
    let rt = bench_runtime();
    let registry = StepExecutorRegistry::new();
    let executor = registry
        .get("DetectionsConsensus")
        .expect("consensus executor registered");
    let context = RuntimeContext::default()
        .with_id_generator(Arc::new(FakeIdGenerator::new("bench".to_string())));

    let runtime: RuntimeParameters = (0..3)
        .map(|s| (format!("source_{}", s), Segment::Detections(source(s, 100))))
        .collect();
    let pool = VariablePool::new(Arc::new(runtime), Arc::new(OutputsLookup::new()));
    let step = StepDefinition::new("DetectionsConsensus", "vote")
        .with_field(
            "predictions",
            serde_json::json!(["$inputs.source_0", "$inputs.source_1", "$inputs.source_2"]),
        )
        .with_field("required_votes", 2);

    c.bench_function("consensus_step_3x100", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(executor.execute(&step, &pool, &context).await);
        });
    });
}

criterion_group!(benches, bench_resolve_consensus, bench_consensus_step);
criterion_main!(benches);
