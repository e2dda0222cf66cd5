//! Benchmarks for planning and seed derivation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use epochflow::graph::{PlanCache, StageDefinition, StageGraph};
use epochflow::registry::Registry;
use epochflow::scheduler::derive_seed;

/// Layered graph: `layers` waves of `width` stages, each depending on the whole previous layer.
fn layered(layers: usize, width: usize) -> Vec<StageDefinition> {
    let name = |l: usize, i: usize| format!("l{l:02}_s{i:02}");
    (0..layers)
        .flat_map(|l| {
            (0..width).map(move |i| {
                let stage = StageDefinition::new(name(l, i));
                if l == 0 {
                    stage
                } else {
                    stage.with_predecessors((0..width).map(|p| name(l - 1, p)))
                }
            })
        })
        .collect()
}

fn planning_benchmark(c: &mut Criterion) {
    let stages = layered(10, 20);
    c.bench_function("build_graph_200", |b| {
        b.iter(|| StageGraph::build(black_box(stages.clone())))
    });

    let cache = PlanCache::new();
    c.bench_function("plan_cache_hit_200", |b| {
        b.iter(|| cache.get_or_build(black_box(&stages)))
    });
}

fn seed_benchmark(c: &mut Criterion) {
    c.bench_function("derive_seed", |b| {
        b.iter(|| derive_seed(black_box("enrollment"), black_box(2026), black_box(17), black_box(42)))
    });
}

fn hash_benchmark(c: &mut Criterion) {
    let registry = (0..10_000).fold(Registry::new("workforce", 2026), |r, i| {
        r.with_entry(format!("emp-{i:06}"), serde_json::json!({ "salary": i * 10 }))
    });
    c.bench_function("registry_hash_10k", |b| b.iter(|| black_box(&registry).content_hash()));
}

criterion_group!(benches, planning_benchmark, seed_benchmark, hash_benchmark);
criterion_main!(benches);
