//! Error types for pipeline execution.

use pllm_template::TemplateError;
use pllm_topo::GraphError;
use thiserror::Error;

/// Why a pipeline run stopped.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The graph has no execution order.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The graph names an agent nobody registered.
    #[error("no agent registered under `{0}`")]
    UnknownAgent(String),

    /// An agent returned an error.
    #[error("agent `{agent}` failed: {source}")]
    AgentFailed {
        agent: String,
        #[source]
        source: AgentError,
    },

    /// An agent panicked while running.
    #[error("agent `{0}` panicked")]
    Panicked(String),

    /// A connected output was never produced.
    #[error("agent `{source_agent}` produced no output `{output}` for `{target}.{param}`")]
    MissingOutput {
        source_agent: String,
        output: String,
        target: String,
        param: String,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn a thread for agent `{agent}`: {source}")]
    Spawn {
        agent: String,
        #[source]
        source: std::io::Error,
    },
}

/// An error raised by a single agent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The backing model call failed.
    #[error("model error: {0}")]
    Model(String),

    #[error("{0}")]
    Custom(String),
}
