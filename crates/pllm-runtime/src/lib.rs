//! PLLM Runtime - concurrent execution of agent pipelines
//!
//! This crate runs a checked pipeline:
//! - `Executor` - runs the agents of a `DependencyGraph` layer by layer
//! - `Agent` - one unit of work; any `Fn(&Values) -> Result<Values, _>` is one
//! - `PromptAgent` - an agent driven by a chat template and a `Model`
//!
//! Agents of one layer run concurrently on scoped threads and the runtime
//! waits for the whole layer before starting the next. If any agent fails
//! the run stops and the error is returned instead of partial outputs.

pub mod error;
pub mod executor;
pub mod prompt;

pub use error::{AgentError, RuntimeError};
pub use executor::{Agent, Executor, ExecutorConfig, OutputTable, Values};
pub use prompt::{Model, PromptAgent};
