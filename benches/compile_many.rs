//! Throughput benchmark for `compile_many` over a synthetic project,
//! generated fresh per batch so allocation cost isn't timed alongside
//! compilation.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use sfc_compiler::pipeline::CompileMode;
use sfc_compiler::testutil::ScratchProject;
use sfc_compiler::Engine;

fn build_project(file_count: usize) -> (ScratchProject, Vec<std::path::PathBuf>) {
    let project = ScratchProject::new().expect("scratch project setup");
    let paths = (0..file_count)
        .map(|i| {
            project
                .add_source(
                    &format!("mod_{i}.ts"),
                    &format!("export const value_{i}: number = {i}; export default value_{i};"),
                )
                .expect("write source")
        })
        .collect();
    (project, paths)
}

fn bench_compile_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_many");

    for &file_count in &[10usize, 100, 500] {
        group.bench_function(format!("{file_count}_files"), |b| {
            b.iter_batched(
                || build_project(file_count),
                |(project, paths)| {
                    let engine = Engine::builder(project.root()).build();
                    engine.compile_many_paths(&paths, CompileMode::Batch)
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile_many);
criterion_main!(benches);
