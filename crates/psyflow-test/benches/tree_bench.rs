//! Benchmarks for PSYFLOW chunk tree construction and traversal

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use psyflow_core::{DataMap, TrialIndex};
use psyflow_data::{DataStore, WriteContext};
use psyflow_random::Randomizer;
use psyflow_runtime::plugins::Text;
use psyflow_timeline::{ChunkNode, ChunkTree, PluginRegistry, Structure, TreeBuilder, TrialNode};

fn structure() -> Structure {
    let texts: Vec<Value> = (0..20).map(|i| json!(format!("stimulus {}", i))).collect();
    let block = TrialNode::new("text")
        .with_param("text", texts)
        .randomize_order(true)
        .repetitions(5);
    // One practice pass, repeated only if it wrote nothing
    let practice = ChunkNode::repeat_while(
        vec![TrialNode::new("text").with_param("text", "practice").into()],
        |pass| pass.is_empty(),
    );
    Structure::new(vec![practice.into(), ChunkNode::linear(vec![block.into()]).into()])
}

fn build(registry: &PluginRegistry, structure: &Structure, seed: u64) -> ChunkTree {
    TreeBuilder::new(registry)
        .randomizer(Randomizer::with_seed(seed))
        .build(structure)
        .expect("bench structure is valid")
}

fn bench_build(c: &mut Criterion) {
    let registry = PluginRegistry::new().with(Text);
    let structure = structure();

    c.bench_function("tree_build_101_trials", |b| {
        b.iter(|| black_box(build(&registry, &structure, 1).length()))
    });
}

fn bench_drain(c: &mut Criterion) {
    let registry = PluginRegistry::new().with(Text);
    let structure = structure();

    c.bench_function("tree_drain_101_trials", |b| {
        b.iter(|| {
            let mut tree = build(&registry, &structure, 2);
            let mut store = DataStore::new();
            let mut index = TrialIndex::ZERO;
            while let Some(trial) = tree.next(&store) {
                let context = WriteContext {
                    kind: trial.kind().to_string(),
                    trial_index: index,
                    trial_index_local: tree.current_trial_local_index().unwrap_or_default(),
                    time_elapsed: Default::default(),
                    chunk_id: tree.active_chunk_id().unwrap_or_default(),
                };
                store.write(&context, &DataMap::new(), &DataMap::new());
                index = index.next();
                tree.advance(&store);
            }
            black_box(store.len())
        })
    });
}

criterion_group!(benches, bench_build, bench_drain);

criterion_main!(benches);
