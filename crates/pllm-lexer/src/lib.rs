//! PLLM Language Lexer
//!
//! Tokenizes PLLM source in two passes:
//!
//! 1. a `logos` scanner produces raw tokens (keywords, literals, operators,
//!    physical newlines), skipping spaces and `#` comments;
//! 2. an indentation layer ([`Layout`]) folds physical newlines into logical
//!    `Newline` tokens and synthesizes `Indent`/`Dedent` from changes in the
//!    leading whitespace of each logical line.
//!
//! Illegal characters are reported as [`LexError`]s and skipped, so a single
//! run reports all of them.

use logos::Logos;
use pllm_diagnostics::{Diagnostic, Location, Stage};
use smol_str::SmolStr;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Range;
use tracing::{debug, instrument, trace};

// ============================================================================
// Positions and spans
// ============================================================================

/// A point in the source: byte offset plus 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Self { offset, line, column }
    }

    pub fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }
}

/// Source span representing a range in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A zero-width span at `at`.
    pub fn point(at: Position) -> Self {
        Self { start: at, end: at }
    }

    pub fn merge(self, other: Span) -> Span {
        if self.is_dummy() {
            return other;
        }
        if other.is_dummy() {
            return self;
        }
        let start = if other.start.offset < self.start.offset {
            other.start
        } else {
            self.start
        };
        let end = if other.end.offset > self.end.offset {
            other.end
        } else {
            self.end
        };
        Span { start, end }
    }

    /// The `{0, 0}` span used when no position is known.
    pub fn dummy() -> Self {
        Self::default()
    }

    pub fn is_dummy(&self) -> bool {
        self.start.line == 0 && self.end.line == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.start.offset..self.end.offset
    }

    /// Stamps this span's line/column and byte range onto a diagnostic.
    pub fn locate(&self, diagnostic: Diagnostic) -> Diagnostic {
        diagnostic
            .with_location(self.start.location(), self.end.location())
            .with_range(self.range())
    }
}

impl From<Span> for Range<usize> {
    fn from(span: Span) -> Self {
        span.range()
    }
}

/// Maps byte offsets to line/column positions.
#[derive(Debug, Clone)]
pub struct LineIndex<'src> {
    source: &'src str,
    line_starts: Vec<usize>,
}

impl<'src> LineIndex<'src> {
    pub fn new(source: &'src str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self { source, line_starts }
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[line - 1];
        let column = self
            .source
            .get(line_start..offset)
            .map_or(offset - line_start, |prefix| prefix.chars().count());
        Position::new(offset, line, column + 1)
    }

    pub fn span(&self, range: Range<usize>) -> Span {
        Span::new(self.position(range.start), self.position(range.end))
    }

    pub fn end(&self) -> Position {
        self.position(self.source.len())
    }

    /// Number of spaces and tabs between the start of `at`'s line and `at`.
    fn indent_width(&self, at: Position) -> usize {
        let line_start = self.line_starts[at.line.max(1) - 1];
        self.source
            .get(line_start..at.offset)
            .map_or(0, |prefix| prefix.chars().filter(|c| matches!(c, ' ' | '\t')).count())
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// A token with its kind, source text and location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: SmolStr,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<SmolStr>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    /// A structural token with no source text.
    pub fn synthetic(kind: TokenKind, span: Span) -> Self {
        Self::new(kind, SmolStr::default(), span)
    }
}

/// Scanner-level failure, converted to [`LexError`] with a position.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScanError {
    #[default]
    IllegalCharacter,
    UnterminatedTripleString,
}

/// Consumes a `"""` string up to the first closing `"""`.
fn triple_string(lex: &mut logos::Lexer<TokenKind>) -> Result<SmolStr, ScanError> {
    let remainder = lex.remainder();
    match remainder.find("\"\"\"") {
        Some(end) => {
            let content = SmolStr::new(&remainder[..end]);
            lex.bump(end + 3);
            Ok(content)
        }
        None => {
            lex.bump(remainder.len());
            Err(ScanError::UnterminatedTripleString)
        }
    }
}

fn unquote(lex: &mut logos::Lexer<TokenKind>) -> SmolStr {
    let slice = lex.slice();
    SmolStr::new(&slice[1..slice.len() - 1])
}

fn text(lex: &mut logos::Lexer<TokenKind>) -> SmolStr {
    SmolStr::new(lex.slice())
}

/// All token types in the PLLM language
#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
#[logos(error = ScanError)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum TokenKind {
    // ========== Keywords ==========
    #[token("agent")]
    Agent,
    #[token("input")]
    Input,
    #[token("output")]
    Output,
    #[token("model")]
    Model,
    #[token("chat")]
    Chat,
    #[token("connect")]
    Connect,
    #[token("memory")]
    Memory,
    #[token("global")]
    Global,
    #[token("fun")]
    #[token("def")]
    Fun,
    #[token("return")]
    Return,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("type")]
    Type,

    // ========== Type keywords ==========
    #[token("record")]
    Record,
    #[token("tuple")]
    Tuple,
    #[token("list")]
    List,
    #[token("union")]
    Union,
    #[token("unit")]
    #[token("void")]
    Unit,
    #[token("str")]
    Str,
    #[token("int")]
    Int,
    #[token("float")]
    Float,
    #[token("bool")]
    Bool,

    // ========== Literals ==========
    #[token("True", |_| true)]
    #[token("true", |_| true)]
    #[token("False", |_| false)]
    #[token("false", |_| false)]
    BoolLit(bool),

    #[regex("[0-9]+", text)]
    IntLit(SmolStr),

    #[regex(r"[0-9]+\.[0-9]+", text)]
    FloatLit(SmolStr),

    /// Single-line string, quotes stripped
    #[regex(r#""[^"\n]*""#, unquote)]
    StringLit(SmolStr),

    /// `"""..."""`, may span lines, quotes stripped
    #[token("\"\"\"", triple_string)]
    TripleString(SmolStr),

    #[regex("[A-Za-z_][A-Za-z0-9_]*", text)]
    Identifier(SmolStr),

    // ========== Operators ==========
    #[token("->")]
    Arrow,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Eq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // ========== Delimiters ==========
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // ========== Layout ==========
    #[token("\n")]
    Newline,
    /// Synthesized by [`Layout`]
    Indent,
    /// Synthesized by [`Layout`]
    Dedent,
    /// End of input
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Agent => write!(f, "agent"),
            TokenKind::Input => write!(f, "input"),
            TokenKind::Output => write!(f, "output"),
            TokenKind::Model => write!(f, "model"),
            TokenKind::Chat => write!(f, "chat"),
            TokenKind::Connect => write!(f, "connect"),
            TokenKind::Memory => write!(f, "memory"),
            TokenKind::Global => write!(f, "global"),
            TokenKind::Fun => write!(f, "fun"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::For => write!(f, "for"),
            TokenKind::In => write!(f, "in"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Elif => write!(f, "elif"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::While => write!(f, "while"),
            TokenKind::Break => write!(f, "break"),
            TokenKind::Continue => write!(f, "continue"),
            TokenKind::Type => write!(f, "type"),
            TokenKind::Record => write!(f, "record"),
            TokenKind::Tuple => write!(f, "tuple"),
            TokenKind::List => write!(f, "list"),
            TokenKind::Union => write!(f, "union"),
            TokenKind::Unit => write!(f, "unit"),
            TokenKind::Str => write!(f, "str"),
            TokenKind::Int => write!(f, "int"),
            TokenKind::Float => write!(f, "float"),
            TokenKind::Bool => write!(f, "bool"),
            TokenKind::BoolLit(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            TokenKind::IntLit(n) => write!(f, "integer {}", n),
            TokenKind::FloatLit(n) => write!(f, "float {}", n),
            TokenKind::StringLit(_) => write!(f, "string"),
            TokenKind::TripleString(_) => write!(f, "triple-quoted string"),
            TokenKind::Identifier(name) => write!(f, "identifier {}", name),
            TokenKind::Arrow => write!(f, "->"),
            TokenKind::EqEq => write!(f, "=="),
            TokenKind::NotEq => write!(f, "!="),
            TokenKind::LtEq => write!(f, "<="),
            TokenKind::GtEq => write!(f, ">="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Eq => write!(f, "="),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Indent => write!(f, "indent"),
            TokenKind::Dedent => write!(f, "dedent"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

impl TokenKind {
    /// Check if this token is a reserved word
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Agent
                | TokenKind::Input
                | TokenKind::Output
                | TokenKind::Model
                | TokenKind::Chat
                | TokenKind::Connect
                | TokenKind::Memory
                | TokenKind::Global
                | TokenKind::Fun
                | TokenKind::Return
                | TokenKind::For
                | TokenKind::In
                | TokenKind::If
                | TokenKind::Elif
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Type
                | TokenKind::Record
                | TokenKind::Tuple
                | TokenKind::List
                | TokenKind::Union
                | TokenKind::Unit
                | TokenKind::Str
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::Bool
        )
    }

    /// Tokens produced by the indentation layer rather than the source text.
    pub fn is_layout(&self) -> bool {
        matches!(
            self,
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof
        )
    }

    fn opens_bracket(&self) -> bool {
        matches!(self, TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace)
    }

    fn closes_bracket(&self) -> bool {
        matches!(self, TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Lexer error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("Illegal character '{ch}'")]
    UnexpectedCharacter { ch: char, span: Span },

    #[error("Unterminated triple-quoted string")]
    UnterminatedString { span: Span },

    #[error("Inconsistent dedent: indentation {width} does not match any enclosing block")]
    InconsistentDedent { width: usize, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedCharacter { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::InconsistentDedent { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LexError::UnexpectedCharacter { .. } => "L0001",
            LexError::UnterminatedString { .. } => "L0002",
            LexError::InconsistentDedent { .. } => "L0003",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        self.span()
            .locate(Diagnostic::new(Stage::Lex, self.code(), self.to_string()))
    }
}

// ============================================================================
// Indentation layer
// ============================================================================

/// Turns raw scanner tokens into logical lines.
///
/// Invariants on the output stream:
/// - no `Newline` directly follows another `Newline` or starts the stream;
/// - `Indent`/`Dedent` only ever directly follow a `Newline` (or the start);
/// - the number of `Indent`s equals the number of `Dedent`s;
/// - the stream ends with exactly one `Eof`.
///
/// Inside `()`, `[]` and `{}` physical newlines are ignored.
pub struct Layout<'a, I> {
    raw: I,
    index: &'a LineIndex<'a>,
    indents: Vec<usize>,
    /// A dedent width that matched no open block, with the stack depth of
    /// the block it was folded into
    misaligned: Option<(usize, usize)>,
    pending: VecDeque<Token>,
    pending_newline: Option<Token>,
    bracket_depth: usize,
    at_line_start: bool,
    finished: bool,
    errors: Vec<LexError>,
}

impl<'a, I: Iterator<Item = Token>> Layout<'a, I> {
    pub fn new(raw: I, index: &'a LineIndex<'a>) -> Self {
        Self {
            raw,
            index,
            indents: vec![0],
            misaligned: None,
            pending: VecDeque::new(),
            pending_newline: None,
            bracket_depth: 0,
            at_line_start: true,
            finished: false,
            errors: Vec::new(),
        }
    }

    pub fn into_errors(self) -> Vec<LexError> {
        self.errors
    }

    fn top(&self) -> usize {
        self.indents.last().copied().unwrap_or(0)
    }

    fn feed(&mut self, token: Token) {
        if token.kind == TokenKind::Newline {
            if self.bracket_depth == 0 && !self.at_line_start {
                self.pending_newline = Some(token);
                self.at_line_start = true;
            }
            return;
        }

        if self.at_line_start {
            if let Some(newline) = self.pending_newline.take() {
                self.pending.push_back(newline);
            }
            self.indent_to(token.span.start);
            self.at_line_start = false;
        }

        if token.kind.opens_bracket() {
            self.bracket_depth += 1;
        } else if token.kind.closes_bracket() {
            self.bracket_depth = self.bracket_depth.saturating_sub(1);
        }
        self.pending.push_back(token);
    }

    fn indent_to(&mut self, at: Position) {
        let width = self.index.indent_width(at);
        let span = Span::point(at);

        if self.misaligned == Some((self.indents.len(), width)) {
            return;
        }
        if width > self.top() {
            trace!(width, "indent");
            self.indents.push(width);
            self.pending.push_back(Token::synthetic(TokenKind::Indent, span));
            return;
        }

        while width < self.top() {
            trace!(width, "dedent");
            self.indents.pop();
            self.pending.push_back(Token::synthetic(TokenKind::Dedent, span));
            if matches!(self.misaligned, Some((depth, _)) if depth > self.indents.len()) {
                self.misaligned = None;
            }
        }
        if width != self.top() {
            if self.misaligned == Some((self.indents.len(), width)) {
                return;
            }
            // The line and later lines at this width belong to the enclosing block.
            self.errors.push(LexError::InconsistentDedent { width, span });
            self.misaligned = Some((self.indents.len(), width));
        }
    }

    fn finish(&mut self) {
        let eof = Span::point(self.index.end());
        if let Some(newline) = self.pending_newline.take() {
            self.pending.push_back(newline);
        } else if !self.at_line_start {
            self.pending.push_back(Token::synthetic(TokenKind::Newline, eof));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.pending.push_back(Token::synthetic(TokenKind::Dedent, eof));
        }
        self.pending.push_back(Token::synthetic(TokenKind::Eof, eof));
        self.finished = true;
    }
}

impl<I: Iterator<Item = Token>> Iterator for Layout<'_, I> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }
            if self.finished {
                return None;
            }
            match self.raw.next() {
                Some(token) => self.feed(token),
                None => self.finish(),
            }
        }
    }
}

// ============================================================================
// Lexer
// ============================================================================

/// Lexer for PLLM source code
pub struct Lexer<'src> {
    source: &'src str,
    index: LineIndex<'src>,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            index: LineIndex::new(source),
        }
    }

    /// Get the source code being lexed
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Raw scanner tokens, including physical newlines, without layout.
    pub fn scan(&self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        for (result, range) in TokenKind::lexer(self.source).spanned() {
            let span = self.index.span(range.clone());
            match result {
                Ok(kind) => tokens.push(Token::new(kind, &self.source[range], span)),
                Err(ScanError::UnterminatedTripleString) => {
                    errors.push(LexError::UnterminatedString { span });
                }
                Err(ScanError::IllegalCharacter) => {
                    let ch = self.source[range].chars().next().unwrap_or('?');
                    errors.push(LexError::UnexpectedCharacter { ch, span });
                }
            }
        }

        (tokens, errors)
    }

    /// Tokenize the entire source into a stream of logical-line tokens
    #[instrument(skip_all, fields(bytes = self.source.len()))]
    pub fn tokenize(&self) -> (Vec<Token>, Vec<LexError>) {
        let (raw, mut errors) = self.scan();
        let mut layout = Layout::new(raw.into_iter(), &self.index);
        let tokens: Vec<Token> = layout.by_ref().collect();
        errors.extend(layout.into_errors());
        errors.sort_by_key(|error| error.span().start.offset);

        debug!(tokens = tokens.len(), errors = errors.len(), "tokenized");
        (tokens, errors)
    }
}

/// Tokenizes `source`; shorthand for `Lexer::new(source).tokenize()`.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
    Lexer::new(source).tokenize()
}
