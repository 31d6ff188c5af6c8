//! Front-end Performance Benchmarks
//!
//! This module benchmarks the PLLM front-end stages:
//! - Lexer throughput (bytes/second)
//! - Parser throughput
//! - Type checking of agent pipelines
//! - Dependency graph construction and ordering
//! - The full `compile` driver

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pllm_benchmarks::{chain_pipeline, fan_in_pipeline, statements};
use pllm_checker::TypeChecker;
use pllm_compiler::{compile, CompileOptions};
use pllm_topo::DependencyGraph;

fn sources() -> Vec<(&'static str, String)> {
    vec![
        ("fan_in_8", fan_in_pipeline(8)),
        ("fan_in_64", fan_in_pipeline(64)),
        ("chain_64", chain_pipeline(64)),
        ("statements_200", statements(200)),
    ]
}

// ============================================================================
// Lexer Benchmarks
// ============================================================================

fn bench_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer");

    for (name, source) in sources() {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::new("tokenize", name), &source, |b, source| {
            b.iter(|| {
                let (tokens, _errors) = pllm_lexer::tokenize(black_box(source));
                black_box(tokens)
            })
        });
    }

    group.finish();
}

// ============================================================================
// Parser Benchmarks
// ============================================================================

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    for (name, source) in sources() {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", name), &source, |b, source| {
            b.iter(|| {
                let (program, _errors) = pllm_parser::parse(black_box(source));
                black_box(program)
            })
        });
    }

    group.finish();
}

// ============================================================================
// Checker and Graph Benchmarks
// ============================================================================

fn bench_checker(c: &mut Criterion) {
    let mut group = c.benchmark_group("checker");

    for (name, source) in sources() {
        let (program, _) = pllm_parser::parse(&source);
        group.bench_with_input(BenchmarkId::new("check_program", name), &program, |b, program| {
            b.iter(|| {
                let mut checker = TypeChecker::new().unwrap();
                black_box(checker.check_program(black_box(program)))
            })
        });
    }

    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");

    for width in [8, 64, 256] {
        let (program, _) = pllm_parser::parse(&fan_in_pipeline(width));
        group.bench_with_input(BenchmarkId::new("build_and_sort", width), &program, |b, program| {
            b.iter(|| {
                let graph = DependencyGraph::from_connections(program.connections());
                black_box(graph.topological_sort())
            })
        });
    }

    let (program, _) = pllm_parser::parse(&chain_pipeline(256));
    let graph = DependencyGraph::from_connections(program.connections());
    group.bench_function("layers/chain_256", |b| b.iter(|| black_box(graph.layers())));

    group.finish();
}

// ============================================================================
// Full Pipeline
// ============================================================================

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let options = CompileOptions::default();

    for (name, source) in sources() {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::new("compile", name), &source, |b, source| {
            b.iter(|| black_box(compile(black_box(source), &options)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_lexer,
    bench_parser,
    bench_checker,
    bench_graph,
    bench_compile,
);

criterion_main!(benches);
