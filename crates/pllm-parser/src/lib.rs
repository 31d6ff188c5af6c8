//! PLLM Language Parser
//!
//! Recursive-descent parser over the layout-aware token stream produced by
//! `pllm-lexer`. Parsing never stops at the first syntax error: the blocks
//! users most often get wrong (input/output/memory declarations, model names,
//! parameter lists, assignment values, loop and branch headers) have error
//! productions that record exactly one [`ParseError`], leave a placeholder in
//! the tree, and resume at the next recognizable boundary. Anything else is
//! recovered at line granularity.
//!
//! Binary operators are left-associative; precedence from lowest to highest
//! is additive (`+ -`), multiplicative (`* / %`), comparison
//! (`== != < > <= >=`).

use pllm_ast::*;
use pllm_diagnostics::{Diagnostic, Stage};
use pllm_lexer::{LexError, Lexer, Token, TokenKind};
use pllm_types::Aliases;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Parse error type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("Syntax error at token '{found}', expected {expected}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Syntax error at EOF, expected {expected}")]
    UnexpectedEof { expected: String, span: Span },

    #[error("Invalid variable declaration in {block} block")]
    InvalidDeclaration { block: &'static str, span: Span },

    #[error("Invalid model name")]
    InvalidModelName { span: Span },

    #[error("Invalid parameter list in function definition")]
    InvalidParameterList { span: Span },

    #[error("Invalid expression in assignment")]
    InvalidAssignment { span: Span },

    #[error("Invalid assignment target")]
    InvalidTarget { span: Span },

    #[error("Invalid iterable in For")]
    InvalidIterable { span: Span },

    #[error("Invalid condition of {construct}")]
    InvalidCondition { construct: &'static str, span: Span },

    #[error("Unknown type `{name}`")]
    UnknownType { name: String, span: Span },

    #[error("Duplicate field `{name}` in record type")]
    DuplicateField { name: String, span: Span },

    #[error("Only one connect block is allowed")]
    DuplicateConnect { span: Span },

    #[error("`{word}` is a reserved word")]
    ReservedWord { word: String, span: Span },

    #[error("Invalid number literal `{text}`")]
    InvalidNumber { text: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lex(err) => err.span(),
            ParseError::UnexpectedToken { span, .. }
            | ParseError::UnexpectedEof { span, .. }
            | ParseError::InvalidDeclaration { span, .. }
            | ParseError::InvalidModelName { span }
            | ParseError::InvalidParameterList { span }
            | ParseError::InvalidAssignment { span }
            | ParseError::InvalidTarget { span }
            | ParseError::InvalidIterable { span }
            | ParseError::InvalidCondition { span, .. }
            | ParseError::UnknownType { span, .. }
            | ParseError::DuplicateField { span, .. }
            | ParseError::DuplicateConnect { span }
            | ParseError::ReservedWord { span, .. }
            | ParseError::InvalidNumber { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ParseError::Lex(err) => err.code(),
            ParseError::UnexpectedToken { .. } => "P0001",
            ParseError::UnexpectedEof { .. } => "P0002",
            ParseError::InvalidDeclaration { .. } => "P0003",
            ParseError::InvalidModelName { .. } => "P0004",
            ParseError::InvalidParameterList { .. } => "P0005",
            ParseError::InvalidAssignment { .. } => "P0006",
            ParseError::InvalidTarget { .. } => "P0007",
            ParseError::InvalidIterable { .. } => "P0008",
            ParseError::InvalidCondition { .. } => "P0009",
            ParseError::UnknownType { .. } => "P0010",
            ParseError::DuplicateField { .. } => "P0011",
            ParseError::DuplicateConnect { .. } => "P0012",
            ParseError::ReservedWord { .. } => "P0013",
            ParseError::InvalidNumber { .. } => "P0014",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ParseError::Lex(err) => err.to_diagnostic(),
            other => other
                .span()
                .locate(Diagnostic::new(Stage::Parse, other.code(), other.to_string())),
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parser state
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    eof: Token,
    errors: Vec<ParseError>,
    /// `type N = T` definitions seen so far
    aliases: Aliases,
    seen_connect: bool,
}

impl Parser {
    /// Create a new parser from source code; lexer errors are kept as parse errors
    pub fn new(source: &str) -> Self {
        let (tokens, lex_errors) = Lexer::new(source).tokenize();
        let mut parser = Self::from_tokens(tokens);
        parser
            .errors
            .extend(lex_errors.into_iter().map(ParseError::Lex));
        parser
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        let eof_span = tokens.last().map_or(Span::dummy(), |t| t.span);
        Self {
            tokens,
            pos: 0,
            eof: Token::synthetic(TokenKind::Eof, eof_span),
            errors: Vec::new(),
            aliases: Aliases::default(),
            seen_connect: false,
        }
    }

    /// Parse the entire program
    #[instrument(skip_all, fields(tokens = self.tokens.len()))]
    pub fn parse_program(&mut self) -> Program {
        let start = self.current_span();
        let mut items = Vec::new();

        while !self.is_eof() {
            match self.current_kind() {
                TokenKind::Newline | TokenKind::Dedent => {
                    self.advance();
                    continue;
                }
                TokenKind::Indent => {
                    let error = self.unexpected("statement");
                    self.report(error);
                    self.synchronize_line();
                    continue;
                }
                _ => {}
            }
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(error) => {
                    self.report(error);
                    self.synchronize_line();
                }
            }
        }

        debug!(items = items.len(), errors = self.errors.len(), "parsed program");
        Program {
            items,
            span: start.merge(self.previous_span()),
        }
    }

    /// Get collected errors
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    pub fn aliases(&self) -> &Aliases {
        &self.aliases
    }

    // ========================================================================
    // Token Navigation
    // ========================================================================

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map_or(&self.eof.kind, |t| &t.kind)
    }

    /// Span of the last consumed token that came from the source text.
    fn previous_span(&self) -> Span {
        self.tokens[..self.pos.min(self.tokens.len())]
            .iter()
            .rev()
            .find(|t| !t.kind.is_layout())
            .map_or(Span::dummy(), |t| t.span)
    }

    fn is_eof(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn at_line_end(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof
        )
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<Ident> {
        match self.current_kind() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let span = self.advance().span;
                Ok(Spanned::new(name, span))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /// A statement ends at a newline, or right before a dedent or EOF.
    fn expect_line_end(&mut self) -> ParseResult<()> {
        match self.current_kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Dedent | TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.current();
        if token.kind == TokenKind::Eof {
            return ParseError::UnexpectedEof {
                expected: expected.to_string(),
                span: token.span,
            };
        }
        let found = if token.lexeme.is_empty() {
            token.kind.to_string()
        } else {
            token.lexeme.to_string()
        };
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found,
            span: token.span,
        }
    }

    fn report(&mut self, error: ParseError) {
        warn!(%error, "syntax error");
        self.errors.push(error);
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Skips the rest of the current logical line, together with any block
    /// nested under it. Stops before a dedent that closes the enclosing block.
    fn synchronize_line(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.current_kind() {
                TokenKind::Eof => return,
                TokenKind::Indent => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::Dedent => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                }
                TokenKind::Newline => {
                    self.advance();
                    if depth == 0 && !self.check(&TokenKind::Indent) {
                        return;
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Skips to the end of the indented block we are in, consuming its dedent.
    fn skip_block(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.current_kind() {
                TokenKind::Eof => return,
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => {
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn skip_until(&mut self, stop: impl Fn(&TokenKind) -> bool) {
        while !self.is_eof() && !stop(self.current_kind()) {
            self.advance();
        }
    }

    fn skip_to_closing_paren(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.current_kind() {
                TokenKind::Eof | TokenKind::Newline => return,
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                _ => {}
            }
            self.advance();
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    fn parse_item(&mut self) -> ParseResult<TopLevelItem> {
        match self.current_kind() {
            TokenKind::Agent => self.parse_agent_def().map(TopLevelItem::Agent),
            TokenKind::Connect => {
                let header = self.current_span();
                let block = self.parse_connect_block()?;
                if self.seen_connect {
                    self.report(ParseError::DuplicateConnect { span: header });
                }
                self.seen_connect = true;
                Ok(TopLevelItem::Connect(block))
            }
            TokenKind::Fun => self.parse_func_def().map(TopLevelItem::Function),
            _ => self.parse_statement().map(TopLevelItem::Statement),
        }
    }

    /// `NEWLINE INDENT item+ DEDENT`, or a single item on the same line.
    fn parse_suite<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<Vec<T>> {
        if !self.eat(&TokenKind::Newline) {
            return Ok(vec![item(self)?]);
        }
        self.expect(TokenKind::Indent)?;

        let mut items = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.is_eof() {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            match item(self) {
                Ok(parsed) => items.push(parsed),
                Err(error) => {
                    self.report(error);
                    self.synchronize_line();
                }
            }
        }
        self.eat(&TokenKind::Dedent);
        Ok(items)
    }

    fn parse_agent_def(&mut self) -> ParseResult<AgentDef> {
        let start = self.expect(TokenKind::Agent)?.span;
        let name = self.expect_ident("agent name")?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite(Self::parse_agent_item)?;
        Ok(AgentDef {
            name,
            body,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_agent_item(&mut self) -> ParseResult<AgentItem> {
        match self.current_kind() {
            TokenKind::Input => self.parse_decl_block("input").map(AgentItem::Input),
            TokenKind::Output => self.parse_decl_block("output").map(AgentItem::Output),
            TokenKind::Memory => self.parse_decl_block("memory").map(AgentItem::Memory),
            TokenKind::Model => self.parse_model_block().map(AgentItem::Model),
            TokenKind::Chat => self.parse_chat_block().map(AgentItem::Chat),
            _ => self.parse_statement().map(AgentItem::Statement),
        }
    }

    /// `input:`/`output:`/`memory:` followed by an indented declaration
    /// list, a braced list, or one inline declaration. The first invalid
    /// declaration is reported once and the rest of the block is dropped.
    fn parse_decl_block(&mut self, block: &'static str) -> ParseResult<DeclBlock> {
        let start = self.advance().span;
        self.expect(TokenKind::Colon)?;
        let mut decls = Vec::new();

        if self.eat(&TokenKind::LBrace) {
            if let Err(error) = self.parse_braced_decls(&mut decls) {
                self.report(ParseError::InvalidDeclaration {
                    block,
                    span: error.span(),
                });
                self.skip_until(|k| matches!(k, TokenKind::RBrace | TokenKind::Newline));
                self.eat(&TokenKind::RBrace);
            }
            self.expect_line_end()?;
        } else if self.eat(&TokenKind::Newline) {
            self.expect(TokenKind::Indent)?;
            while !self.check(&TokenKind::Dedent) && !self.is_eof() {
                match self.parse_var_decl_line() {
                    Ok(decl) => decls.push(decl),
                    Err(error) => {
                        self.report(ParseError::InvalidDeclaration {
                            block,
                            span: error.span(),
                        });
                        self.skip_block();
                        return Ok(DeclBlock {
                            decls,
                            span: start.merge(self.previous_span()),
                        });
                    }
                }
            }
            self.eat(&TokenKind::Dedent);
        } else {
            match self.parse_var_decl_line() {
                Ok(decl) => decls.push(decl),
                Err(error) => {
                    self.report(ParseError::InvalidDeclaration {
                        block,
                        span: error.span(),
                    });
                    self.synchronize_line();
                }
            }
        }

        Ok(DeclBlock {
            decls,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_braced_decls(&mut self, decls: &mut Vec<VarDecl>) -> ParseResult<()> {
        loop {
            if self.eat(&TokenKind::RBrace) {
                return Ok(());
            }
            decls.push(self.parse_var_decl()?);
            if self.eat(&TokenKind::RBrace) {
                return Ok(());
            }
            self.expect(TokenKind::Comma)?;
        }
    }

    fn parse_var_decl_line(&mut self) -> ParseResult<VarDecl> {
        let decl = self.parse_var_decl()?;
        self.expect_line_end()?;
        Ok(decl)
    }

    /// `name: type [= default]`
    fn parse_var_decl(&mut self) -> ParseResult<VarDecl> {
        let name = self.expect_ident("variable name")?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_annotation()?;
        let default = if self.eat(&TokenKind::Eq) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(VarDecl {
            span: name.span.merge(self.previous_span()),
            name,
            ty,
            default,
        })
    }

    fn parse_model_block(&mut self) -> ParseResult<ModelBlock> {
        let start = self.advance().span;
        self.expect(TokenKind::Colon)?;
        let name = match self.parse_expression() {
            Ok(expr) if self.at_line_end() => expr,
            other => {
                let span = other.err().map_or(self.current_span(), |e| e.span());
                self.report(ParseError::InvalidModelName { span });
                self.skip_until(|k| matches!(k, TokenKind::Newline | TokenKind::Dedent));
                Expression::Error(span)
            }
        };
        let span = start.merge(self.previous_span());
        self.expect_line_end()?;
        Ok(ModelBlock { name, span })
    }

    fn parse_chat_block(&mut self) -> ParseResult<ChatBlock> {
        let start = self.advance().span;
        self.expect(TokenKind::Colon)?;
        let indented = self.eat(&TokenKind::Newline);
        if indented {
            self.expect(TokenKind::Indent)?;
        }

        let template = match self.current_kind() {
            TokenKind::TripleString(text) | TokenKind::StringLit(text) => {
                let text = text.clone();
                self.advance();
                text
            }
            _ => return Err(self.unexpected("template string")),
        };
        let span = start.merge(self.previous_span());
        self.expect_line_end()?;
        if indented {
            self.expect(TokenKind::Dedent)?;
        }
        Ok(ChatBlock { template, span })
    }

    fn parse_connect_block(&mut self) -> ParseResult<ConnectBlock> {
        let start = self.expect(TokenKind::Connect)?.span;
        self.expect(TokenKind::Colon)?;
        let connections = self.parse_suite(Self::parse_connection)?;
        Ok(ConnectBlock {
            connections,
            span: start.merge(self.previous_span()),
        })
    }

    /// `name: type A.output.x -> B.input.y`, with the edge either inline or
    /// on its own indented line.
    fn parse_connection(&mut self) -> ParseResult<Connection> {
        let name = self.expect_ident("connection name")?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_annotation()?;
        let indented = self.eat(&TokenKind::Newline);
        if indented {
            self.expect(TokenKind::Indent)?;
        }

        let source = self.parse_agent_ref()?;
        self.expect(TokenKind::Arrow)?;
        let target = self.parse_agent_ref()?;
        let span = name.span.merge(self.previous_span());

        self.expect_line_end()?;
        if indented {
            self.expect(TokenKind::Dedent)?;
        }
        Ok(Connection {
            name,
            ty,
            source,
            target,
            span,
        })
    }

    fn parse_agent_ref(&mut self) -> ParseResult<AgentRef> {
        let agent = self.expect_ident("agent name")?;
        self.expect(TokenKind::Dot)?;
        let direction = match self.current_kind() {
            TokenKind::Input => PortDirection::Input,
            TokenKind::Output => PortDirection::Output,
            _ => return Err(self.unexpected("`input` or `output`")),
        };
        self.advance();
        self.expect(TokenKind::Dot)?;
        let field = self.expect_ident("port name")?;
        Ok(AgentRef {
            span: agent.span.merge(field.span),
            agent,
            direction,
            field,
        })
    }

    fn parse_func_def(&mut self) -> ParseResult<FuncDef> {
        let start = self.expect(TokenKind::Fun)?.span;
        let name = self.expect_ident("function name")?;
        self.expect(TokenKind::LParen)?;
        let params = match self.parse_params() {
            Ok(params) => params,
            Err(error) => {
                self.report(ParseError::InvalidParameterList { span: error.span() });
                self.skip_to_closing_paren();
                Vec::new()
            }
        };
        let returns = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_return_types()?)
        } else {
            None
        };
        self.expect(TokenKind::Colon)?;
        let body = self.parse_suite(Self::parse_statement)?;
        Ok(FuncDef {
            name,
            params,
            returns,
            body,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_params(&mut self) -> ParseResult<Vec<ParamDecl>> {
        let mut params = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let name = self.expect_ident("parameter name")?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_annotation()?;
            params.push(ParamDecl {
                span: name.span.merge(ty.span),
                name,
                ty,
            });
            if self.eat(&TokenKind::RParen) {
                return Ok(params);
            }
            self.expect(TokenKind::Comma)?;
        }
    }

    /// `-> T`, `-> (T1, T2)`, or `-> (P) -> R` (a single function-typed return).
    fn parse_return_types(&mut self) -> ParseResult<Vec<TypeAnnotation>> {
        if !self.check(&TokenKind::LParen) {
            return Ok(vec![self.parse_type_annotation()?]);
        }
        let start = self.advance().span;
        let items = self.parse_type_list(TokenKind::RParen)?;
        if !self.eat(&TokenKind::Arrow) {
            return Ok(items);
        }
        let params = items.into_iter().map(|a| a.ty).collect();
        let returns = self.parse_function_returns()?;
        Ok(vec![TypeAnnotation {
            ty: Type::function(params, returns),
            span: start.merge(self.previous_span()),
        }])
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn parse_type_annotation(&mut self) -> ParseResult<TypeAnnotation> {
        let start = self.current_span();
        let ty = self.parse_type()?;
        Ok(TypeAnnotation {
            ty,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_type(&mut self) -> ParseResult<Type> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Int | TokenKind::Float | TokenKind::Str | TokenKind::Bool | TokenKind::Unit => {
                self.advance();
                Ok(Type::basic(&token.lexeme))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(self.resolve_type_name(name, token.span))
            }
            TokenKind::List => {
                self.advance();
                self.expect(TokenKind::LBracket)?;
                let element = self.parse_type()?;
                self.expect(TokenKind::RBracket)?;
                Ok(Type::list(element))
            }
            TokenKind::Tuple => {
                self.advance();
                self.expect(TokenKind::LBracket)?;
                let items = self.parse_type_list(TokenKind::RBracket)?;
                Ok(Type::tuple(items.into_iter().map(|a| a.ty)))
            }
            TokenKind::Union => {
                self.advance();
                self.expect(TokenKind::LBracket)?;
                let members = self.parse_type_list(TokenKind::RBracket)?;
                Ok(Type::union(members.into_iter().map(|a| a.ty)))
            }
            TokenKind::Record => {
                self.advance();
                self.expect(TokenKind::LBrace)?;
                let fields = self.parse_field_decls()?;
                Ok(Type::record(
                    fields.into_iter().map(|field| (field.name.node, field.ty.ty)),
                ))
            }
            TokenKind::LParen => {
                self.advance();
                let params = self.parse_type_list(TokenKind::RParen)?;
                self.expect(TokenKind::Arrow)?;
                let returns = self.parse_function_returns()?;
                Ok(Type::function(
                    params.into_iter().map(|a| a.ty).collect(),
                    returns,
                ))
            }
            _ => Err(self.unexpected("type")),
        }
    }

    fn parse_function_returns(&mut self) -> ParseResult<Vec<Type>> {
        if self.eat(&TokenKind::LParen) {
            let returns = self.parse_type_list(TokenKind::RParen)?;
            Ok(returns.into_iter().map(|a| a.ty).collect())
        } else {
            Ok(vec![self.parse_type()?])
        }
    }

    /// Comma-separated types, consuming `close`.
    fn parse_type_list(&mut self, close: TokenKind) -> ParseResult<Vec<TypeAnnotation>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_type_annotation()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(TokenKind::Comma)?;
        }
    }

    fn parse_field_decls(&mut self) -> ParseResult<Vec<FieldDecl>> {
        let mut fields: Vec<FieldDecl> = Vec::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(fields);
        }
        loop {
            let name = self.expect_ident("field name")?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_annotation()?;
            let field = FieldDecl {
                span: name.span.merge(ty.span),
                name,
                ty,
            };
            if fields.iter().any(|f| f.name.node == field.name.node) {
                self.report(ParseError::DuplicateField {
                    name: field.name.node.to_string(),
                    span: field.span,
                });
            } else {
                fields.push(field);
            }
            if self.eat(&TokenKind::RBrace) {
                return Ok(fields);
            }
            self.expect(TokenKind::Comma)?;
        }
    }

    /// Unknown names are reported and read as `any` so parsing can go on.
    fn resolve_type_name(&mut self, name: &SmolStr, span: Span) -> Type {
        if let Some(ty) = pllm_types::builtin(name) {
            return ty;
        }
        if let Some(target) = self.aliases.get(name) {
            return Type::alias(name.clone(), target.clone());
        }
        self.report(ParseError::UnknownType {
            name: name.to_string(),
            span,
        });
        Type::Any
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.current_kind() {
            TokenKind::If => self.parse_if().map(Statement::If),
            TokenKind::While => self.parse_while().map(Statement::While),
            TokenKind::For => self.parse_for().map(Statement::For),
            TokenKind::Return => self.parse_return().map(Statement::Return),
            TokenKind::Break => {
                let span = self.advance().span;
                self.expect_line_end()?;
                Ok(Statement::Break(span))
            }
            TokenKind::Continue => {
                let span = self.advance().span;
                self.expect_line_end()?;
                Ok(Statement::Continue(span))
            }
            TokenKind::Type => self.parse_type_def().map(Statement::TypeDef),
            TokenKind::Global => {
                let token = self.advance();
                Err(ParseError::ReservedWord {
                    word: token.lexeme.to_string(),
                    span: token.span,
                })
            }
            TokenKind::Identifier(_) if self.peek_kind() == &TokenKind::Colon => {
                self.parse_typed_assignment().map(Statement::Assign)
            }
            _ => self.parse_assignment_or_expr(),
        }
    }

    /// An expression followed by `:`. A malformed expression is reported
    /// once through `error` and replaced by a placeholder.
    fn parse_header(&mut self, error: fn(Span) -> ParseError) -> Expression {
        match self.parse_expression() {
            Ok(expr) if self.check(&TokenKind::Colon) => {
                self.advance();
                expr
            }
            other => {
                let span = other.err().map_or(self.current_span(), |e| e.span());
                self.report(error(span));
                self.skip_until(|k| {
                    matches!(k, TokenKind::Colon | TokenKind::Newline | TokenKind::Dedent)
                });
                self.eat(&TokenKind::Colon);
                Expression::Error(span)
            }
        }
    }

    fn parse_if(&mut self) -> ParseResult<IfStmt> {
        let start = self.expect(TokenKind::If)?.span;
        let condition = self.parse_header(|span| ParseError::InvalidCondition {
            construct: "If",
            span,
        });
        let then_branch = self.parse_suite(Self::parse_statement)?;

        let mut elif_branches = Vec::new();
        while self.check(&TokenKind::Elif) {
            let elif_start = self.advance().span;
            let condition = self.parse_header(|span| ParseError::InvalidCondition {
                construct: "If",
                span,
            });
            let body = self.parse_suite(Self::parse_statement)?;
            elif_branches.push(ElifBranch {
                condition,
                body,
                span: elif_start.merge(self.previous_span()),
            });
        }

        let else_branch = if self.eat(&TokenKind::Else) {
            self.expect(TokenKind::Colon)?;
            Some(self.parse_suite(Self::parse_statement)?)
        } else {
            None
        };

        Ok(IfStmt {
            condition,
            then_branch,
            elif_branches,
            else_branch,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_while(&mut self) -> ParseResult<WhileStmt> {
        let start = self.expect(TokenKind::While)?.span;
        let condition = self.parse_header(|span| ParseError::InvalidCondition {
            construct: "While",
            span,
        });
        let body = self.parse_suite(Self::parse_statement)?;
        Ok(WhileStmt {
            condition,
            body,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_for(&mut self) -> ParseResult<ForStmt> {
        let start = self.expect(TokenKind::For)?.span;
        let var = self.expect_ident("loop variable")?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_header(|span| ParseError::InvalidIterable { span });
        let body = self.parse_suite(Self::parse_statement)?;
        Ok(ForStmt {
            var,
            iterable,
            body,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_return(&mut self) -> ParseResult<ReturnStmt> {
        let start = self.expect(TokenKind::Return)?.span;
        let mut values = Vec::new();
        if !self.at_line_end() {
            values.push(self.parse_expression()?);
            while self.eat(&TokenKind::Comma) {
                values.push(self.parse_expression()?);
            }
        }
        let span = start.merge(self.previous_span());
        self.expect_line_end()?;
        Ok(ReturnStmt { values, span })
    }

    fn parse_type_def(&mut self) -> ParseResult<TypeDefStmt> {
        let start = self.expect(TokenKind::Type)?.span;
        let name = self.expect_ident("type name")?;
        self.expect(TokenKind::Eq)?;
        let ty = self.parse_type_annotation()?;
        let span = start.merge(self.previous_span());
        self.expect_line_end()?;
        self.aliases.insert(name.node.clone(), ty.ty.clone());
        Ok(TypeDefStmt { name, ty, span })
    }

    /// `name: T = value`
    fn parse_typed_assignment(&mut self) -> ParseResult<AssignStmt> {
        let name = self.expect_ident("variable name")?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_annotation()?;
        self.expect(TokenKind::Eq)?;
        let value = self.parse_assigned_value();
        let span = name.span.merge(self.previous_span());
        self.expect_line_end()?;
        Ok(AssignStmt {
            target: AssignTarget::Name(name),
            ty: Some(ty),
            value,
            span,
        })
    }

    fn parse_assignment_or_expr(&mut self) -> ParseResult<Statement> {
        let start = self.current_span();
        let expr = self.parse_expression()?;

        if self.eat(&TokenKind::Eq) {
            let target = match expr {
                Expression::Identifier(ident) => AssignTarget::Name(ident),
                Expression::FieldAccess(access) => AssignTarget::Field(access),
                Expression::IndexAccess(access) => AssignTarget::Index(access),
                other => return Err(ParseError::InvalidTarget { span: other.span() }),
            };
            let value = self.parse_assigned_value();
            let span = start.merge(self.previous_span());
            self.expect_line_end()?;
            return Ok(Statement::Assign(AssignStmt {
                target,
                ty: None,
                value,
                span,
            }));
        }

        let span = start.merge(self.previous_span());
        self.expect_line_end()?;
        Ok(Statement::Expr(ExprStmt { expr, span }))
    }

    fn parse_assigned_value(&mut self) -> Expression {
        match self.parse_expression() {
            Ok(expr) if self.at_line_end() => expr,
            other => {
                let span = other.err().map_or(self.current_span(), |e| e.span());
                self.report(ParseError::InvalidAssignment { span });
                self.skip_until(|k| matches!(k, TokenKind::Newline | TokenKind::Dedent));
                Expression::Error(span)
            }
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_binary_level(Self::parse_multiplicative, |kind| match kind {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        self.parse_binary_level(Self::parse_comparison, |kind| match kind {
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::Percent => Some(BinOp::Mod),
            _ => None,
        })
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        self.parse_binary_level(Self::parse_postfix, |kind| match kind {
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::NotEq => Some(BinOp::NotEq),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::LtEq => Some(BinOp::LtEq),
            TokenKind::GtEq => Some(BinOp::GtEq),
            _ => None,
        })
    }

    /// One left-associative precedence level.
    fn parse_binary_level(
        &mut self,
        operand: fn(&mut Self) -> ParseResult<Expression>,
        operator: fn(&TokenKind) -> Option<BinOp>,
    ) -> ParseResult<Expression> {
        let mut left = operand(self)?;
        while let Some(op) = operator(self.current_kind()) {
            self.advance();
            let right = operand(self)?;
            let span = left.span().merge(right.span());
            left = Expression::BinaryOp(BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let field = self.expect_ident("field name")?;
                let span = expr.span().merge(field.span);
                expr = Expression::FieldAccess(FieldAccess {
                    object: Box::new(expr),
                    field,
                    span,
                });
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.expect(TokenKind::RBracket)?;
                let span = expr.span().merge(self.previous_span());
                expr = Expression::IndexAccess(IndexAccess {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                });
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let token = self.current().clone();
        let constant = |value| {
            Ok(Expression::Constant(Constant {
                value,
                span: token.span,
            }))
        };

        match &token.kind {
            TokenKind::IntLit(text) => {
                self.advance();
                let value = match text.parse::<i64>() {
                    Ok(value) => value,
                    Err(_) => {
                        self.report(ParseError::InvalidNumber {
                            text: text.to_string(),
                            span: token.span,
                        });
                        0
                    }
                };
                constant(Literal::Int(value))
            }
            TokenKind::FloatLit(text) => {
                self.advance();
                constant(Literal::Float(text.parse::<f64>().unwrap_or(0.0)))
            }
            TokenKind::StringLit(text) | TokenKind::TripleString(text) => {
                self.advance();
                constant(Literal::Str(text.clone()))
            }
            TokenKind::BoolLit(value) => {
                self.advance();
                constant(Literal::Bool(*value))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                let ident = Spanned::new(name.clone(), token.span);
                if !self.eat(&TokenKind::LParen) {
                    return Ok(Expression::Identifier(ident));
                }
                let args = self.parse_expr_list(TokenKind::RParen)?;
                Ok(Expression::FuncCall(FuncCall {
                    callee: ident,
                    args,
                    span: token.span.merge(self.previous_span()),
                }))
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_expr_list(TokenKind::RBracket)?;
                Ok(Expression::List(ListExpr {
                    elements,
                    span: token.span.merge(self.previous_span()),
                }))
            }
            TokenKind::LBrace => {
                self.advance();
                let fields = self.parse_record_fields()?;
                Ok(Expression::Record(RecordExpr {
                    fields,
                    span: token.span.merge(self.previous_span()),
                }))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_expr_list(&mut self, close: TokenKind) -> ParseResult<Vec<Expression>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(TokenKind::Comma)?;
        }
    }

    /// `{name = expr, ...}` after the opening brace.
    fn parse_record_fields(&mut self) -> ParseResult<Vec<InstanceAssign>> {
        let mut fields = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                return Ok(fields);
            }
            let name = self.expect_ident("field name")?;
            self.expect(TokenKind::Eq)?;
            let value = self.parse_expression()?;
            fields.push(InstanceAssign {
                span: name.span.merge(value.span()),
                name,
                value,
            });
            if self.eat(&TokenKind::RBrace) {
                return Ok(fields);
            }
            self.expect(TokenKind::Comma)?;
        }
    }
}

/// Convenience function to parse a string into a Program.
///
/// Lexer errors come first in source order together with syntax errors;
/// the program is always returned, possibly with placeholder nodes.
pub fn parse(source: &str) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(source);
    let program = parser.parse_program();
    let mut errors = parser.into_errors();
    errors.sort_by_key(|error| error.span().start.offset);
    (program, errors)
}
