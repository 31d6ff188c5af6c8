//! PLLM Compiler
//!
//! Runs the front-end over one source text: lexing and parsing with error
//! recovery, type checking, and building the agent dependency graph. All
//! recoverable problems come back as [`Diagnostic`]s on the
//! [`Compilation`]; only configuration problems and (by default) a cyclic
//! pipeline are returned as [`CompileError`]. A cyclic pipeline still
//! carries every diagnostic collected before the graph was ordered.

pub mod config;

pub use config::{CheckerOptions, CompileOptions, ConfigError, GraphOptions};

use indexmap::IndexMap;
use pllm_ast::{Program, Type};
use pllm_checker::TypeChecker;
use pllm_diagnostics::{Diagnostic, DiagnosticReport};
use pllm_topo::{DependencyGraph, GraphError};
use pllm_types::TypeParseError;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid built-in function signature: {0}")]
    Builtins(#[from] TypeParseError),

    #[error("{error}")]
    Graph {
        error: GraphError,
        /// Everything reported for the source, ending with the cycle
        diagnostics: Vec<Diagnostic>,
    },
}

impl CompileError {
    /// Diagnostics to show for a failed compilation, if it got that far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Graph { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

/// Everything the front-end produced for one source text.
#[derive(Debug)]
pub struct Compilation {
    pub program: Program,
    /// Lex, parse, type and graph problems, in that order
    pub diagnostics: Vec<Diagnostic>,
    pub graph: DependencyGraph,
    /// Agents in execution order; empty when the graph has a cycle
    pub order: Vec<String>,
    /// Port types by `Agent.input.field` / `Agent.output.field`
    pub agent_io: IndexMap<String, Type>,
}

impl Compilation {
    /// No diagnostics at all; code generation may go ahead.
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn report(&self) -> DiagnosticReport {
        DiagnosticReport::from_diagnostics(self.diagnostics.clone())
    }
}

/// Compiles `source` through every front-end stage.
///
/// Type checking and graph construction run even when parsing reported
/// problems, on whatever the parser recovered.
#[instrument(skip_all, fields(len = source.len()))]
pub fn compile(source: &str, options: &CompileOptions) -> Result<Compilation, CompileError> {
    let (program, parse_errors) = pllm_parser::parse(source);
    let mut diagnostics: Vec<Diagnostic> = parse_errors.iter().map(|e| e.to_diagnostic()).collect();
    debug!(errors = parse_errors.len(), "parsed");

    let mut checker = TypeChecker::new()?.with_policy(options.checker.undefined_names);
    let type_errors = checker.check_program(&program);
    diagnostics.extend(type_errors.iter().map(|e| e.to_diagnostic()));
    debug!(errors = type_errors.len(), "checked");

    let graph = DependencyGraph::from_connections(program.connections());
    let order = match graph.topological_sort() {
        Ok(order) => order,
        Err(error) if options.graph.require_acyclic => {
            diagnostics.push(error.to_diagnostic());
            return Err(CompileError::Graph { error, diagnostics });
        }
        Err(err) => {
            diagnostics.push(err.to_diagnostic());
            Vec::new()
        }
    };

    info!(
        diagnostics = diagnostics.len(),
        agents = graph.node_count(),
        "compiled"
    );
    Ok(Compilation {
        agent_io: checker.agent_io().clone(),
        program,
        diagnostics,
        graph,
        order,
    })
}

/// Only the diagnostics of compiling `source` with default options.
pub fn check(source: &str) -> Result<Vec<Diagnostic>, CompileError> {
    compile(source, &CompileOptions::default()).map(|compilation| compilation.diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pllm_checker::LookupPolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stages_are_ordered() {
        let source = "x = 1 ?\ny: int = \"s\"\n";
        let codes: Vec<_> = check(source)
            .unwrap()
            .into_iter()
            .map(|d| d.code)
            .collect();
        assert_eq!(codes, ["L0001", "T0001"]);
    }

    #[test]
    fn test_strict_names_from_options() {
        let mut options = CompileOptions::default();
        assert!(compile("y = nothing\n", &options).unwrap().is_ok());

        options.checker.undefined_names = LookupPolicy::Strict;
        let compilation = compile("y = nothing\n", &options).unwrap();
        assert_eq!(compilation.diagnostics[0].code, "T0003");
    }

    #[test]
    fn test_cycle_policy() {
        let source = "connect:\n    a: int A.output.x -> B.input.y\n    b: int B.output.y -> A.input.x\n";
        let err = compile(source, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Graph { .. }));

        let mut options = CompileOptions::default();
        options.graph.require_acyclic = false;
        let compilation = compile(source, &options).unwrap();
        assert!(compilation.order.is_empty());
        assert_eq!(
            compilation.diagnostics.last().map(|d| d.code.as_str()),
            Some("G0001")
        );
    }

    #[test]
    fn test_cycle_keeps_earlier_diagnostics() {
        let source = "x: int = \"s\"\nconnect:\n    a: int A.output.x -> B.input.y\n    b: int B.output.y -> A.input.x\n";
        let err = compile(source, &CompileOptions::default()).unwrap_err();
        let codes: Vec<_> = err.diagnostics().iter().map(|d| d.code.as_str()).collect();
        assert!(codes.contains(&"T0001"), "{codes:?}");
        assert_eq!(codes.last(), Some(&"G0001"));
        assert_eq!(
            err.to_string(),
            "Cyclic dependency between agents: A -> B -> A"
        );
        assert!(CompileError::from(TypeParseError::UnknownType("x".into()))
            .diagnostics()
            .is_empty());
    }

    #[test]
    fn test_report_payload() {
        let compilation = compile("x: int = 1\n", &CompileOptions::default()).unwrap();
        insta::assert_snapshot!(compilation.report().to_json().unwrap(), @r###"
        {
          "result": "success",
          "diagnostics": []
        }
        "###);
    }
}
