//! Runtime Performance Benchmarks
//!
//! Measures the executor's per-layer overhead: spawning scoped threads,
//! routing outputs through the parameter mapping, and template filling in
//! prompt agents backed by an instant model.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pllm_benchmarks::{chain_pipeline, fan_in_pipeline};
use indexmap::IndexMap;
use pllm_runtime::{Agent, AgentError, Executor, PromptAgent, Values};
use pllm_topo::DependencyGraph;
use serde_json::{json, Value};

fn graph_for(source: &str) -> DependencyGraph {
    let (program, _) = pllm_parser::parse(source);
    DependencyGraph::from_connections(program.connections())
}

fn constant(outputs: &[&str]) -> impl Fn(&Values) -> Result<Values, AgentError> + Send + Sync {
    let values: Values = outputs
        .iter()
        .map(|name| (name.to_string(), json!("text")))
        .collect();
    move |_inputs: &Values| Ok(values.clone())
}

fn increment(inputs: &Values) -> Result<Values, AgentError> {
    let n = inputs.get("n").and_then(Value::as_i64).unwrap_or_default();
    let mut outputs = Values::new();
    outputs.insert("m".to_string(), json!(n + 1));
    Ok(outputs)
}

fn echo(_system: &str, _prompt: &str) -> Result<String, AgentError> {
    Ok("<completion0>fine</completion0>".to_string())
}

// ============================================================================
// Executor Benchmarks
// ============================================================================

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_fan_in");

    for width in [4, 16, 64] {
        let graph = graph_for(&fan_in_pipeline(width));
        let mut executor = Executor::new();
        executor.register("reader", constant(&["article"]));
        for i in 0..width {
            let output = format!("review{i}");
            executor.register(format!("critic{i}"), constant(&[output.as_str()]));
        }
        executor.register("summarizer", constant(&["summary"]));

        group.bench_with_input(BenchmarkId::new("run", width), &graph, |b, graph| {
            b.iter(|| black_box(executor.run(graph, &IndexMap::new())))
        });
    }

    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_chain");

    for length in [4, 32] {
        let graph = graph_for(&chain_pipeline(length));
        let mut executor = Executor::new();
        for i in 0..length {
            executor.register(format!("step{i}"), increment);
        }

        let mut seed = IndexMap::new();
        seed.insert("step0".to_string(), Values::from([("n".to_string(), json!(0))]));

        group.bench_with_input(BenchmarkId::new("run", length), &graph, |b, graph| {
            b.iter(|| black_box(executor.run(graph, &seed)))
        });
    }

    group.finish();
}

// ============================================================================
// Prompt Agents
// ============================================================================

fn bench_prompt_agent(c: &mut Criterion) {
    let agent = PromptAgent::new("Review {article} and {notes}: ${verdict}", echo).unwrap();
    let mut inputs = Values::new();
    inputs.insert("article".to_string(), json!("a long article ".repeat(64)));
    inputs.insert("notes".to_string(), json!(["one", "two"]));

    c.bench_function("prompt_agent/run", |b| {
        b.iter(|| black_box(agent.run(black_box(&inputs))))
    });
}

criterion_group!(benches, bench_fan_in, bench_chain, bench_prompt_agent);

criterion_main!(benches);
