//! PLLM Language Abstract Syntax Tree
//!
//! A closed set of node kinds, one struct per construct, grouped into the
//! [`TopLevelItem`], [`AgentItem`], [`Statement`] and [`Expression`] sum
//! types. Every node carries a mandatory [`Span`]. Type annotations are
//! parsed once, by the parser, into [`Type`] values.

pub use pllm_lexer::Span;
pub use pllm_types::Type;
pub use smol_str::SmolStr;

use std::fmt;

/// A spanned value - wraps any value with source location info
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn dummy(node: T) -> Self {
        Self {
            node,
            span: Span::dummy(),
        }
    }
}

/// Identifier (variable, agent, field and function names)
pub type Ident = Spanned<SmolStr>;

/// Anything that knows where it came from.
pub trait HasSpan {
    fn span(&self) -> Span;
}

/// Span from the leftmost to the rightmost element; dummy when empty.
pub fn span_of<T: HasSpan>(items: &[T]) -> Span {
    items
        .iter()
        .fold(Span::dummy(), |acc, item| acc.merge(item.span()))
}

// ============================================================================
// Program Structure
// ============================================================================

/// A complete PLLM source file
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<TopLevelItem>,
    pub span: Span,
}

impl Program {
    pub fn agents(&self) -> impl Iterator<Item = &AgentDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevelItem::Agent(agent) => Some(agent),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FuncDef> {
        self.items.iter().filter_map(|item| match item {
            TopLevelItem::Function(func) => Some(func),
            _ => None,
        })
    }

    pub fn connect_blocks(&self) -> impl Iterator<Item = &ConnectBlock> {
        self.items.iter().filter_map(|item| match item {
            TopLevelItem::Connect(block) => Some(block),
            _ => None,
        })
    }

    /// Connections of every `connect` block, in source order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connect_blocks()
            .flat_map(|block| block.connections.iter())
    }
}

/// Top-level declarations
#[derive(Debug, Clone, PartialEq)]
pub enum TopLevelItem {
    Statement(Statement),
    Agent(AgentDef),
    Connect(ConnectBlock),
    Function(FuncDef),
}

impl HasSpan for TopLevelItem {
    fn span(&self) -> Span {
        match self {
            TopLevelItem::Statement(stmt) => stmt.span(),
            TopLevelItem::Agent(agent) => agent.span,
            TopLevelItem::Connect(block) => block.span,
            TopLevelItem::Function(func) => func.span,
        }
    }
}

/// A type written in the source, already resolved to a [`Type`].
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnnotation {
    pub ty: Type,
    pub span: Span,
}

/// `name: type [= default]`
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Ident,
    pub ty: TypeAnnotation,
    pub default: Option<Expression>,
    pub span: Span,
}

/// `name: type` inside a `record{...}` type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Ident,
    pub ty: TypeAnnotation,
    pub span: Span,
}

/// `name: type` in a function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: Ident,
    pub ty: TypeAnnotation,
    pub span: Span,
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AgentDef {
    pub name: Ident,
    pub body: Vec<AgentItem>,
    pub span: Span,
}

impl AgentDef {
    pub fn inputs(&self) -> impl Iterator<Item = &VarDecl> {
        self.body.iter().flat_map(|item| match item {
            AgentItem::Input(block) => block.decls.as_slice(),
            _ => &[][..],
        })
    }

    pub fn outputs(&self) -> impl Iterator<Item = &VarDecl> {
        self.body.iter().flat_map(|item| match item {
            AgentItem::Output(block) => block.decls.as_slice(),
            _ => &[][..],
        })
    }

    pub fn memory(&self) -> impl Iterator<Item = &VarDecl> {
        self.body.iter().flat_map(|item| match item {
            AgentItem::Memory(block) => block.decls.as_slice(),
            _ => &[][..],
        })
    }

    pub fn model(&self) -> Option<&ModelBlock> {
        self.body.iter().find_map(|item| match item {
            AgentItem::Model(model) => Some(model),
            _ => None,
        })
    }

    pub fn chat(&self) -> Option<&ChatBlock> {
        self.body.iter().find_map(|item| match item {
            AgentItem::Chat(chat) => Some(chat),
            _ => None,
        })
    }
}

/// One entry of an agent body
#[derive(Debug, Clone, PartialEq)]
pub enum AgentItem {
    Input(InputBlock),
    Output(OutputBlock),
    Memory(MemoryBlock),
    Model(ModelBlock),
    Chat(ChatBlock),
    Statement(Statement),
}

impl HasSpan for AgentItem {
    fn span(&self) -> Span {
        match self {
            AgentItem::Input(block) | AgentItem::Output(block) | AgentItem::Memory(block) => {
                block.span
            }
            AgentItem::Model(model) => model.span,
            AgentItem::Chat(chat) => chat.span,
            AgentItem::Statement(stmt) => stmt.span(),
        }
    }
}

/// A list of declarations under `input:`, `output:` or `memory:`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclBlock {
    pub decls: Vec<VarDecl>,
    pub span: Span,
}

pub type InputBlock = DeclBlock;
pub type OutputBlock = DeclBlock;
pub type MemoryBlock = DeclBlock;

/// `model: <expr>`; the expression names the backing LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBlock {
    pub name: Expression,
    pub span: Span,
}

/// `chat: """..."""` with `{input}` and `${output}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatBlock {
    pub template: SmolStr,
    pub span: Span,
}

// ============================================================================
// Connections
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectBlock {
    pub connections: Vec<Connection>,
    pub span: Span,
}

/// `name: type source -> target`
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub name: Ident,
    pub ty: TypeAnnotation,
    pub source: AgentRef,
    pub target: AgentRef,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// `agent.input.field` or `agent.output.field`
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRef {
    pub agent: Ident,
    pub direction: PortDirection,
    pub field: Ident,
    pub span: Span,
}

impl AgentRef {
    /// The fully-qualified port key, e.g. `Summarizer.output.summary`.
    pub fn key(&self) -> String {
        port_key(&self.agent.node, self.direction, &self.field.node)
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

pub fn port_key(agent: &str, direction: PortDirection, field: &str) -> String {
    format!("{agent}.{direction}.{field}")
}

// ============================================================================
// Functions
// ============================================================================

/// `fun name(params) [-> returns]: body`
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: Ident,
    pub params: Vec<ParamDecl>,
    /// `None` when no return annotation was written
    pub returns: Option<Vec<TypeAnnotation>>,
    pub body: Vec<Statement>,
    pub span: Span,
}

impl FuncDef {
    /// Declared return types; an omitted annotation returns `any`.
    pub fn return_types(&self) -> Vec<Type> {
        match &self.returns {
            Some(returns) => returns.iter().map(|r| r.ty.clone()).collect(),
            None => vec![Type::Any],
        }
    }

    pub fn signature(&self) -> Type {
        Type::function(
            self.params.iter().map(|p| p.ty.ty.clone()).collect(),
            self.return_types(),
        )
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign(AssignStmt),
    Return(ReturnStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    Break(Span),
    Continue(Span),
    TypeDef(TypeDefStmt),
    Expr(ExprStmt),
}

impl HasSpan for Statement {
    fn span(&self) -> Span {
        match self {
            Statement::Assign(s) => s.span,
            Statement::Return(s) => s.span,
            Statement::If(s) => s.span,
            Statement::While(s) => s.span,
            Statement::For(s) => s.span,
            Statement::Break(span) | Statement::Continue(span) => *span,
            Statement::TypeDef(s) => s.span,
            Statement::Expr(s) => s.span,
        }
    }
}

/// `target [: type] = value`
#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub target: AssignTarget,
    pub ty: Option<TypeAnnotation>,
    pub value: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(Ident),
    Field(FieldAccess),
    Index(IndexAccess),
}

impl HasSpan for AssignTarget {
    fn span(&self) -> Span {
        match self {
            AssignTarget::Name(ident) => ident.span,
            AssignTarget::Field(access) => access.span,
            AssignTarget::Index(access) => access.span,
        }
    }
}

/// `return [e1, e2, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub values: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expression,
    pub then_branch: Vec<Statement>,
    pub elif_branches: Vec<ElifBranch>,
    pub else_branch: Option<Vec<Statement>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElifBranch {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub span: Span,
}

/// `for var in iterable: body`
#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub var: Ident,
    pub iterable: Expression,
    pub body: Vec<Statement>,
    pub span: Span,
}

/// `type Name = T`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefStmt {
    pub name: Ident,
    pub ty: TypeAnnotation,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprStmt {
    pub expr: Expression,
    pub span: Span,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(Ident),
    Constant(Constant),
    BinaryOp(BinaryOp),
    FuncCall(FuncCall),
    List(ListExpr),
    Record(RecordExpr),
    FieldAccess(FieldAccess),
    IndexAccess(IndexAccess),
    /// Placeholder left by parser error recovery
    Error(Span),
}

impl HasSpan for Expression {
    fn span(&self) -> Span {
        match self {
            Expression::Identifier(ident) => ident.span,
            Expression::Constant(c) => c.span,
            Expression::BinaryOp(op) => op.span,
            Expression::FuncCall(call) => call.span,
            Expression::List(list) => list.span,
            Expression::Record(record) => record.span,
            Expression::FieldAccess(access) => access.span,
            Expression::IndexAccess(access) => access.span,
            Expression::Error(span) => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Bool(bool),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Int(_) => Type::int(),
            Literal::Float(_) => Type::float(),
            Literal::Str(_) => Type::str(),
            Literal::Bool(_) => Type::bool(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub value: Literal,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl BinOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_comparison(&self) -> bool {
        !self.is_arithmetic()
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::LtEq => "<=",
            BinOp::GtEq => ">=",
        };
        write!(f, "{symbol}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOp {
    pub op: BinOp,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncCall {
    pub callee: Ident,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListExpr {
    pub elements: Vec<Expression>,
    pub span: Span,
}

/// `{name = expr, ...}`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordExpr {
    pub fields: Vec<InstanceAssign>,
    pub span: Span,
}

/// One `name = expr` entry of a record literal.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceAssign {
    pub name: Ident,
    pub value: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldAccess {
    pub object: Box<Expression>,
    pub field: Ident,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexAccess {
    pub object: Box<Expression>,
    pub index: Box<Expression>,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pllm_lexer::Position;
    use pretty_assertions::assert_eq;

    fn span(start: usize, end: usize) -> Span {
        Span::new(Position::new(start, 1, start + 1), Position::new(end, 1, end + 1))
    }

    fn ident(name: &str, start: usize) -> Ident {
        Spanned::new(SmolStr::new(name), span(start, start + name.len()))
    }

    #[test]
    fn test_agent_ref_key() {
        let port = AgentRef {
            agent: ident("A", 0),
            direction: PortDirection::Output,
            field: ident("x", 9),
            span: span(0, 10),
        };
        assert_eq!(port.key(), "A.output.x");
        assert_eq!(port_key("B", PortDirection::Input, "y"), "B.input.y");
    }

    #[test]
    fn test_span_of_merges_children() {
        let items = vec![
            Expression::Identifier(ident("a", 4)),
            Expression::Error(Span::dummy()),
            Expression::Identifier(ident("bc", 10)),
        ];
        assert_eq!(span_of(&items), span(4, 12));
        assert!(span_of::<Expression>(&[]).is_dummy());
    }

    #[test]
    fn test_missing_return_annotation_is_any() {
        let func = FuncDef {
            name: ident("f", 4),
            params: vec![ParamDecl {
                name: ident("x", 6),
                ty: TypeAnnotation {
                    ty: Type::int(),
                    span: span(9, 12),
                },
                span: span(6, 12),
            }],
            returns: None,
            body: Vec::new(),
            span: span(0, 14),
        };
        assert_eq!(
            func.signature(),
            Type::function(vec![Type::int()], vec![Type::Any])
        );
    }

    #[test]
    fn test_agent_accessors() {
        let decl = |name: &str, ty: Type| VarDecl {
            name: ident(name, 0),
            ty: TypeAnnotation { ty, span: span(0, 1) },
            default: None,
            span: span(0, 1),
        };
        let agent = AgentDef {
            name: ident("A", 6),
            body: vec![
                AgentItem::Input(DeclBlock {
                    decls: vec![decl("q", Type::str())],
                    span: span(0, 1),
                }),
                AgentItem::Output(DeclBlock {
                    decls: vec![decl("a", Type::str()), decl("b", Type::int())],
                    span: span(0, 1),
                }),
                AgentItem::Chat(ChatBlock {
                    template: "{q} ${a}".into(),
                    span: span(0, 1),
                }),
            ],
            span: span(0, 40),
        };
        assert_eq!(agent.inputs().count(), 1);
        assert_eq!(agent.outputs().map(|d| d.name.node.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert!(agent.model().is_none());
        assert_eq!(agent.chat().map(|c| c.template.as_str()), Some("{q} ${a}"));
    }
}
