//! PLLM Compiler
//!
//! Command-line interface for the PLLM agent-pipeline language.

use clap::{Parser, Subcommand};
use pllm_ast::{HasSpan, TopLevelItem};
use pllm_compiler::{compile, CompileError, CompileOptions};
use pllm_diagnostics::render::TerminalRenderer;
use pllm_diagnostics::{Diagnostic, DiagnosticReport};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pllmc")]
#[command(version)]
#[command(about = "Front-end for the PLLM agent-pipeline language", long_about = None)]
struct Cli {
    /// Options file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log compiler internals (honours RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lex source file and display tokens
    Lex {
        /// Source file to lex
        file: PathBuf,
    },
    /// Parse source file and display the AST
    Parse {
        /// Source file to parse
        file: PathBuf,
        /// Show full AST details
        #[arg(long)]
        full: bool,
    },
    /// Check source file for errors
    Check {
        /// Source file to check
        file: PathBuf,
        /// Print the diagnostic report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the agent dependency graph and execution order
    Graph {
        /// Source file to analyse
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = match &cli.config {
        Some(path) => match CompileOptions::from_file(path) {
            Ok(options) => options,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => CompileOptions::default(),
    };
    let renderer = if cli.no_color {
        TerminalRenderer::plain()
    } else {
        TerminalRenderer::new()
    };

    match &cli.command {
        Commands::Lex { file } => lex_file(file),
        Commands::Parse { file, full } => parse_file(file, *full, &renderer),
        Commands::Check { file, json } => check_file(file, *json, &options, &renderer),
        Commands::Graph { file } => graph_file(file, &options, &renderer),
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.parse_filters("debug");
    }
    builder.format_timestamp(None).init();
}

fn read_source(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(source) => Some(source),
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            None
        }
    }
}

fn report(renderer: &TerminalRenderer, path: &Path, source: &str, diagnostics: &[Diagnostic]) {
    let filename = path.display().to_string();
    if let Err(e) = renderer.render_all(&filename, source, diagnostics, io::stderr()) {
        eprintln!("Error writing diagnostics: {e}");
    }
}

fn exit_code(diagnostics: &[Diagnostic]) -> ExitCode {
    if diagnostics.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Lex a source file and display tokens
fn lex_file(path: &Path) -> ExitCode {
    let Some(source) = read_source(path) else {
        return ExitCode::FAILURE;
    };
    let (tokens, errors) = pllm_lexer::tokenize(&source);

    println!("Tokens ({}):", tokens.len());
    for token in &tokens {
        println!(
            "  {}:{} {}",
            token.span.start.line, token.span.start.column, token.kind
        );
    }

    let diagnostics: Vec<_> = errors.iter().map(|e| e.to_diagnostic()).collect();
    report(&TerminalRenderer::plain(), path, &source, &diagnostics);
    exit_code(&diagnostics)
}

/// Parse a source file and display the AST
fn parse_file(path: &Path, full: bool, renderer: &TerminalRenderer) -> ExitCode {
    let Some(source) = read_source(path) else {
        return ExitCode::FAILURE;
    };
    let (program, errors) = pllm_parser::parse(&source);

    if full {
        println!("{program:#?}");
    } else {
        println!("Parsed {} items:", program.items.len());
        for item in &program.items {
            print_item_summary(item);
        }
    }

    let diagnostics: Vec<_> = errors.iter().map(|e| e.to_diagnostic()).collect();
    report(renderer, path, &source, &diagnostics);
    exit_code(&diagnostics)
}

fn print_item_summary(item: &TopLevelItem) {
    let line = item.span().start.line;
    match item {
        TopLevelItem::Agent(agent) => println!(
            "  {line}: agent {} ({} inputs, {} outputs)",
            agent.name.node,
            agent.inputs().count(),
            agent.outputs().count()
        ),
        TopLevelItem::Function(func) => {
            println!("  {line}: fun {}: {}", func.name.node, func.signature())
        }
        TopLevelItem::Connect(block) => {
            println!("  {line}: connect ({} connections)", block.connections.len())
        }
        TopLevelItem::Statement(_) => println!("  {line}: statement"),
    }
}

/// Check a source file through every front-end stage
fn check_file(
    path: &Path,
    json: bool,
    options: &CompileOptions,
    renderer: &TerminalRenderer,
) -> ExitCode {
    let Some(source) = read_source(path) else {
        return ExitCode::FAILURE;
    };
    let diagnostics = match compile(&source, options) {
        Ok(compilation) => compilation.diagnostics,
        Err(CompileError::Graph { diagnostics, .. }) => diagnostics,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if json {
        let report = DiagnosticReport::from_diagnostics(diagnostics.clone());
        match report.to_json() {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if diagnostics.is_empty() {
        println!("Check passed: {}", path.display());
    } else {
        report(renderer, path, &source, &diagnostics);
    }
    exit_code(&diagnostics)
}

/// Print the dependency graph, parameter mapping and execution order
fn graph_file(path: &Path, options: &CompileOptions, renderer: &TerminalRenderer) -> ExitCode {
    let Some(source) = read_source(path) else {
        return ExitCode::FAILURE;
    };
    let compilation = match compile(&source, options) {
        Ok(compilation) => compilation,
        Err(CompileError::Graph { diagnostics, .. }) => {
            report(renderer, path, &source, &diagnostics);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match compilation.graph.to_json() {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    }
    if let Ok(layers) = compilation.graph.layers() {
        for (depth, layer) in layers.iter().enumerate() {
            println!("layer {depth}: {}", layer.join(", "));
        }
    }

    report(renderer, path, &source, &compilation.diagnostics);
    exit_code(&compilation.diagnostics)
}
