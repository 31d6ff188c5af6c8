//! Layer-by-layer pipeline execution.
//!
//! Agents run in the layers of the dependency graph. All agents of a layer
//! run at the same time on scoped threads; the next layer starts only after
//! every thread of the current one has been joined. Inputs are copied out of
//! the finished outputs through the graph's `param_mapping`, so agents never
//! share state with each other.

use crate::error::{AgentError, RuntimeError};
use crossbeam_utils::thread;
use indexmap::IndexMap;
use parking_lot::Mutex;
use pllm_topo::DependencyGraph;
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Named values flowing into or out of an agent.
pub type Values = IndexMap<String, Value>;

/// Finished outputs, by agent name.
pub type OutputTable = IndexMap<String, Values>;

/// One unit of work in a pipeline.
pub trait Agent: Send + Sync {
    fn run(&self, inputs: &Values) -> Result<Values, AgentError>;
}

impl<F> Agent for F
where
    F: Fn(&Values) -> Result<Values, AgentError> + Send + Sync,
{
    fn run(&self, inputs: &Values) -> Result<Values, AgentError> {
        self(inputs)
    }
}

/// Configuration for the executor's worker threads.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name prefix for spawned threads; the agent name is appended
    pub thread_name_prefix: String,
    /// Stack size for spawned threads (bytes)
    pub stack_size: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "pllm-agent".to_string(),
            stack_size: None,
        }
    }
}

/// Runs registered agents in dependency order.
#[derive(Default)]
pub struct Executor {
    agents: IndexMap<String, Box<dyn Agent>>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            agents: IndexMap::new(),
            config,
        }
    }

    /// Registers `agent` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, agent: impl Agent + 'static) -> &mut Self {
        self.agents.insert(name.into(), Box::new(agent));
        self
    }

    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Runs every agent of `graph`.
    ///
    /// `seed` holds inputs that no connection provides, by agent name. The
    /// result maps each agent to its outputs, in execution order. The first
    /// failing agent of a layer aborts the run and no outputs are returned.
    #[instrument(skip_all, fields(agents = graph.node_count()))]
    pub fn run(
        &self,
        graph: &DependencyGraph,
        seed: &IndexMap<String, Values>,
    ) -> Result<OutputTable, RuntimeError> {
        let layers = graph.layers()?;
        if let Some(missing) = layers
            .iter()
            .flatten()
            .find(|name| !self.agents.contains_key(name.as_str()))
        {
            return Err(RuntimeError::UnknownAgent(missing.clone()));
        }

        let outputs: Mutex<OutputTable> = Mutex::new(IndexMap::new());
        for (depth, layer) in layers.iter().enumerate() {
            let jobs = {
                let finished = outputs.lock();
                layer
                    .iter()
                    .map(|name| Ok((name, inputs_for(name, graph, seed, &finished)?)))
                    .collect::<Result<Vec<_>, RuntimeError>>()?
            };
            debug!(depth, agents = layer.len(), "running layer");
            self.run_layer(jobs, &outputs)?;
        }

        let mut table = outputs.into_inner();
        Ok(layers
            .iter()
            .flatten()
            .filter_map(|name| table.swap_remove_entry(name.as_str()))
            .collect())
    }

    /// Runs one layer and joins every thread before returning.
    fn run_layer(
        &self,
        jobs: Vec<(&String, Values)>,
        outputs: &Mutex<OutputTable>,
    ) -> Result<(), RuntimeError> {
        let label = jobs
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let outcome = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(jobs.len());
            for (name, inputs) in jobs {
                let agent = self
                    .agents
                    .get(name.as_str())
                    .ok_or_else(|| RuntimeError::UnknownAgent(name.clone()))?;

                let mut builder = scope
                    .builder()
                    .name(format!("{}-{}", self.config.thread_name_prefix, name));
                if let Some(size) = self.config.stack_size {
                    builder = builder.stack_size(size);
                }
                let handle = builder
                    .spawn(move |_| {
                        agent.run(&inputs).map(|values| {
                            outputs.lock().insert(name.clone(), values);
                        })
                    })
                    .map_err(|source| RuntimeError::Spawn {
                        agent: name.clone(),
                        source,
                    })?;
                handles.push((name, handle));
            }

            let mut first_error = None;
            for (name, handle) in handles {
                let error = match handle.join() {
                    Ok(Ok(())) => continue,
                    Ok(Err(source)) => RuntimeError::AgentFailed {
                        agent: name.clone(),
                        source,
                    },
                    Err(_) => RuntimeError::Panicked(name.clone()),
                };
                warn!(%error, "agent failed");
                first_error.get_or_insert(error);
            }
            first_error.map_or(Ok(()), Err)
        });

        outcome.unwrap_or_else(|_| Err(RuntimeError::Panicked(label)))
    }
}

/// Seeded inputs of `agent` plus every connected output it consumes.
fn inputs_for(
    agent: &str,
    graph: &DependencyGraph,
    seed: &IndexMap<String, Values>,
    finished: &OutputTable,
) -> Result<Values, RuntimeError> {
    let mut inputs = seed.get(agent).cloned().unwrap_or_default();
    for (param, (source, output)) in graph.inputs_of(agent).into_iter().flatten() {
        let value = finished
            .get(source)
            .and_then(|values| values.get(output))
            .ok_or_else(|| RuntimeError::MissingOutput {
                source_agent: source.clone(),
                output: output.clone(),
                target: agent.to_string(),
                param: param.clone(),
            })?;
        inputs.insert(param.clone(), value.clone());
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pllm_ast::Span;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn agent<F>(f: F) -> F
    where
        F: Fn(&Values) -> Result<Values, AgentError> + Send + Sync,
    {
        f
    }

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn chain() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_edge("A", "B", Span::dummy());
        graph.bind_input("B", "y", "A", "x");
        graph
    }

    #[test]
    fn test_outputs_flow_through_param_mapping() {
        let mut executor = Executor::new();
        executor
            .register("A", agent(|_| Ok(values(&[("x", json!(20))]))))
            .register("B", agent(|inputs| {
                let y = inputs["y"].as_i64().unwrap_or_default();
                Ok(values(&[("z", json!(y + 1))]))
            }));

        let outputs = executor.run(&chain(), &IndexMap::new()).unwrap();
        assert_eq!(outputs.keys().collect::<Vec<_>>(), ["A", "B"]);
        assert_eq!(outputs["B"]["z"], json!(21));
    }

    #[test]
    fn test_seed_inputs() {
        let mut seed = IndexMap::new();
        seed.insert("A".to_string(), values(&[("path", json!("in.txt"))]));

        let mut executor = Executor::new();
        executor
            .register("A", agent(|inputs| Ok(values(&[("x", inputs["path"].clone())]))))
            .register("B", agent(|inputs| Ok(inputs.clone())));

        let outputs = executor.run(&chain(), &seed).unwrap();
        assert_eq!(outputs["B"]["y"], json!("in.txt"));
    }

    #[test]
    fn test_layer_runs_concurrently() {
        let mut graph = DependencyGraph::new();
        for target in ["B", "C", "D"] {
            graph.add_edge("A", target, Span::dummy());
        }

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut executor = Executor::new();
        executor.register("A", agent(|_| Ok(Values::new())));
        for name in ["B", "C", "D"] {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            executor.register(name, agent(move |_| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(50));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(Values::new())
            }));
        }

        executor.run(&graph, &IndexMap::new()).unwrap();
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_failure_stops_the_run() {
        let ran_b = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran_b);
        let mut executor = Executor::new();
        executor
            .register("A", agent(|_| Err(AgentError::Custom("boom".to_string()))))
            .register("B", agent(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Values::new())
            }));

        let err = executor.run(&chain(), &IndexMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "agent `A` failed: boom");
        assert_eq!(ran_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_agent() {
        let mut executor = Executor::new();
        executor
            .register("A", agent(|_| panic!("bad agent")))
            .register("B", agent(|_| Ok(Values::new())));

        let err = executor.run(&chain(), &IndexMap::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::Panicked(name) if name == "A"));
    }

    #[test]
    fn test_missing_output() {
        let mut executor = Executor::new();
        executor
            .register("A", agent(|_| Ok(Values::new())))
            .register("B", agent(|_| Ok(Values::new())));

        let err = executor.run(&chain(), &IndexMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "agent `A` produced no output `x` for `B.y`");
    }

    #[test]
    fn test_unknown_agent() {
        let mut executor = Executor::new();
        executor.register("A", agent(|_| Ok(Values::new())));
        let err = executor.run(&chain(), &IndexMap::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownAgent(name) if name == "B"));
    }

    #[test]
    fn test_cycle_is_refused() {
        let mut graph = chain();
        graph.add_edge("B", "A", Span::dummy());
        let err = Executor::new().run(&graph, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::Graph(_)));
    }
}
