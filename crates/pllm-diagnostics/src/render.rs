//! Terminal rendering of diagnostics through `ariadne`.

use crate::{Diagnostic, Stage};
use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use std::io::{self, Write};

/// Renders diagnostics against the source text they were produced from.
#[derive(Debug, Clone)]
pub struct TerminalRenderer {
    use_color: bool,
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self { use_color: true }
    }
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }

    /// Writes one report per diagnostic to `out`.
    pub fn render_all<W: Write>(
        &self,
        filename: &str,
        source: &str,
        diagnostics: &[Diagnostic],
        mut out: W,
    ) -> io::Result<()> {
        for diagnostic in diagnostics {
            self.render(filename, source, diagnostic, &mut out)?;
        }
        if !diagnostics.is_empty() {
            writeln!(out, "{} problem(s) found in {}", diagnostics.len(), filename)?;
        }
        Ok(())
    }

    pub fn render<W: Write>(
        &self,
        filename: &str,
        source: &str,
        diagnostic: &Diagnostic,
        out: W,
    ) -> io::Result<()> {
        let range = clamp_range(diagnostic, source.len());
        Report::build(ReportKind::Error, filename, range.start)
            .with_config(Config::default().with_color(self.use_color))
            .with_code(&diagnostic.code)
            .with_message(format!("{} error", diagnostic.stage.name()))
            .with_label(
                Label::new((filename, range))
                    .with_message(&diagnostic.message)
                    .with_color(stage_color(diagnostic.stage)),
            )
            .finish()
            .write((filename, Source::from(source)), out)
    }
}

fn stage_color(stage: Stage) -> Color {
    match stage {
        Stage::Lex => Color::Magenta,
        Stage::Parse => Color::Red,
        Stage::Type => Color::Yellow,
        Stage::Graph => Color::Cyan,
    }
}

/// Keeps the label inside the source; ariadne rejects out-of-bounds spans.
fn clamp_range(diagnostic: &Diagnostic, len: usize) -> std::ops::Range<usize> {
    let start = diagnostic.range.start.min(len);
    let end = diagnostic.range.end.clamp(start, len);
    start..end
}
