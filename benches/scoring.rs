//! Benchmarks for organism scoring.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use image::RgbaImage;

use evolver::{
    compute::{
        DiffMapPool, InstructionKind, Ranker,
        evolution::{Evaluator, Mutator, Organism},
    },
    schema::MutationConfig,
};

fn gradient(size: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        image::Rgba([(x * 255 / size) as u8, (y * 255 / size) as u8, 128, 255])
    })
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    group.sample_size(20);

    for size in [128, 256, 512] {
        let ranker = Arc::new(Ranker::new(&gradient(size)));
        let pool = Arc::new(DiffMapPool::new(size, size, 4));
        let evaluator = Evaluator::new(ranker, Arc::clone(&pool));
        let mut mutator = Mutator::new(
            MutationConfig::default(),
            vec![InstructionKind::Line, InstructionKind::Circle],
            size,
            size,
        )
        .with_seed(7);

        let mut parent = mutator.random_organism(500, 500);
        let scored = evaluator.score(&parent).unwrap();
        parent.set_score(scored.score);
        parent.set_diff_map(scored.diff_map);
        let parent = Arc::new(parent);

        let mut child: Organism = parent.spawn_child();
        let mutation = mutator.mutate(&child);
        child.apply_operations(std::slice::from_ref(&mutation.operation));
        child.set_affected(mutation.affected);

        group.bench_with_input(BenchmarkId::new("incremental", size), &child, |b, child| {
            b.iter(|| {
                let result = evaluator.score(black_box(child)).unwrap();
                pool.release(result.diff_map);
            });
        });

        let mut full = parent.spawn_child();
        full.apply_operations(std::slice::from_ref(&mutation.operation));
        group.bench_with_input(BenchmarkId::new("full", size), &full, |b, full| {
            b.iter(|| {
                let result = evaluator.score(black_box(full)).unwrap();
                pool.release(result.diff_map);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
