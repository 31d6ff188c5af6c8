//! PLLM Diagnostics - the single error currency of the compiler front-end.
//!
//! Every stage (lexer, parser, type checker, graph builder) converts its
//! recoverable errors into a [`Diagnostic`]. Diagnostics from all stages are
//! collected into one run-scoped list and can be:
//!
//! - serialized as a [`DiagnosticReport`] (`{result, diagnostics}`) for editor
//!   integrations,
//! - rendered to a terminal with [`render::TerminalRenderer`].
//!
//! # Example
//!
//! ```rust
//! use pllm_diagnostics::{Diagnostic, DiagnosticReport, Location, Stage};
//!
//! let diagnostic = Diagnostic::new(Stage::Type, "T0001", "type mismatch")
//!     .with_location(Location::new(3, 5), Location::new(3, 9));
//! let report = DiagnosticReport::from_diagnostics(vec![diagnostic]);
//!
//! assert!(report.is_error());
//! ```

pub mod render;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// A 1-based line/column pair. `{0, 0}` marks an unknown position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    Lex,
    #[default]
    Parse,
    Type,
    Graph,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Type => "type",
            Stage::Graph => "graph",
        }
    }
}

/// A compiler diagnostic.
///
/// Only `start`, `end` and `message` take part in serialization; that is the
/// shape promised to external consumers. `code`, `stage` and the byte range
/// exist for terminal rendering and for tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub start: Location,
    pub end: Location,
    pub message: String,
    #[serde(skip)]
    pub code: String,
    #[serde(skip)]
    pub stage: Stage,
    #[serde(skip)]
    pub range: Range<usize>,
}

impl Diagnostic {
    /// Creates a diagnostic with an unknown location.
    pub fn new(stage: Stage, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            start: Location::default(),
            end: Location::default(),
            message: message.into(),
            code: code.into(),
            stage,
            range: 0..0,
        }
    }

    pub fn with_location(mut self, start: Location, end: Location) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Sets the byte range used when rendering against the source text.
    pub fn with_range(mut self, range: Range<usize>) -> Self {
        self.range = range;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error[{}] at {}-{}: {}",
            self.stage.name(),
            self.code,
            self.start,
            self.end,
            self.message
        )
    }
}

/// Overall outcome carried by a [`DiagnosticReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportResult {
    Success,
    Error,
}

/// Editor-facing payload: `{"result": "success"|"error", "diagnostics": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub result: ReportResult,
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticReport {
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let result = if diagnostics.is_empty() {
            ReportResult::Success
        } else {
            ReportResult::Error
        };
        Self { result, diagnostics }
    }

    pub fn is_error(&self) -> bool {
        self.result == ReportResult::Error
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_report_is_success() {
        let report = DiagnosticReport::from_diagnostics(Vec::new());
        assert_eq!(report.result, ReportResult::Success);
        assert!(!report.is_error());
    }

    #[test]
    fn test_report_serializes_public_shape_only() {
        let diagnostic = Diagnostic::new(Stage::Parse, "P0001", "Invalid model name")
            .with_location(Location::new(2, 5), Location::new(2, 12))
            .with_range(10..17);
        let report = DiagnosticReport::from_diagnostics(vec![diagnostic]);
        let json = serde_json::to_string(&report).unwrap();
        insta::assert_snapshot!(json, @r#"{"result":"error","diagnostics":[{"start":{"line":2,"column":5},"end":{"line":2,"column":12},"message":"Invalid model name"}]}"#);
    }

    #[test]
    fn test_display_names_stage_and_code() {
        let diagnostic = Diagnostic::new(Stage::Graph, "G0001", "cycle")
            .with_location(Location::new(1, 1), Location::new(1, 4));
        assert_eq!(diagnostic.to_string(), "graph error[G0001] at 1:1-1:4: cycle");
    }

    #[test]
    fn test_unknown_location() {
        assert!(Location::default().is_unknown());
        assert!(!Location::new(1, 1).is_unknown());
    }
}
