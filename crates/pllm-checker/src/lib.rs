//! PLLM Type Checker
//!
//! One pass over the AST that threads a scoped [`TypeEnvironment`] and a
//! flat table of agent ports (`agent_io`, keyed `Agent.input.field` /
//! `Agent.output.field`). Violations are collected as [`TypeError`]s and the
//! offending expression is typed as `any`, so a single mistake does not
//! cascade into follow-up errors.
//!
//! Every rule uses gradual compatibility ([`Type::compatible`]): `any` on
//! either side is accepted, otherwise the strict subtype relation decides.
//! `connect` blocks are checked after every agent has been seen, so the
//! order of declarations in the file does not matter.

pub mod builtins;
pub mod env;

pub use env::{Scope, TypeEnvironment};

use indexmap::IndexMap;
use pllm_ast::*;
use pllm_diagnostics::{Diagnostic, Stage};
use pllm_types::{Aliases, TypeGraph, TypeParseError};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

// ============================================================================
// Errors
// ============================================================================

/// A type error. Never fatal: checking goes on after each one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("Type mismatch: expected `{expected}`, found `{found}`")]
    Mismatch {
        expected: Type,
        found: Type,
        span: Span,
    },

    #[error("Cannot redeclare `{name}` of type `{previous}` as `{declared}`")]
    Redeclaration {
        name: SmolStr,
        previous: Type,
        declared: Type,
        span: Span,
    },

    #[error("Undefined variable: `{name}`{}", did_you_mean(similar))]
    UndefinedVariable {
        name: SmolStr,
        similar: Vec<String>,
        span: Span,
    },

    #[error("`{name}` is not a function, it has type `{found}`")]
    NotAFunction {
        name: SmolStr,
        found: Type,
        span: Span,
    },

    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: SmolStr,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("Condition of {construct} must be `bool`, found `{found}`")]
    ConditionNotBool {
        construct: &'static str,
        found: Type,
        span: Span,
    },

    #[error("Cannot iterate over `{found}`, expected a list")]
    NotIterable { found: Type, span: Span },

    #[error("Operator `{op}` requires numeric operands, found `{found}`")]
    NonNumericOperand { op: BinOp, found: Type, span: Span },

    #[error("Cannot compare `{left}` with `{right}` using `{op}`")]
    Incomparable {
        op: BinOp,
        left: Type,
        right: Type,
        span: Span,
    },

    #[error("Type `{ty}` has no field `{field}`")]
    NoSuchField {
        field: SmolStr,
        ty: Type,
        span: Span,
    },

    #[error("Cannot index into `{found}`")]
    NotIndexable { found: Type, span: Span },

    #[error("List index must be `int`, found `{found}`")]
    IndexNotInt { found: Type, span: Span },

    #[error("List elements must all have the same type: found `{first}` and `{other}`")]
    HeterogeneousList {
        first: Type,
        other: Type,
        span: Span,
    },

    #[error("Duplicate field `{name}` in record literal")]
    DuplicateRecordField { name: SmolStr, span: Span },

    #[error("Return type mismatch in `{function}`: expected `{expected}`, found `{found}`")]
    ReturnMismatch {
        function: SmolStr,
        expected: Type,
        found: Type,
        span: Span,
    },

    #[error("`return` outside of a function")]
    ReturnOutsideFunction { span: Span },

    #[error("`{keyword}` outside of a loop")]
    LoopControlOutsideLoop { keyword: &'static str, span: Span },

    #[error("Agent `{name}` is already defined")]
    DuplicateAgent { name: SmolStr, span: Span },

    #[error("Model name must be `str`, found `{found}`")]
    ModelNameNotStr { found: Type, span: Span },

    #[error("Chat template uses `{{{name}}}` but no such variable is visible")]
    UnknownTemplateInput { name: String, span: Span },

    #[error("Chat template uses `${{{name}}}` but the agent has no such output")]
    UnknownTemplateOutput { name: String, span: Span },

    #[error("Invalid chat template: {message}")]
    InvalidTemplate { message: String, span: Span },

    #[error("Undeclared agent port `{port}`")]
    UndeclaredPort { port: String, span: Span },

    #[error("Connection `{connection}`: `{source_port}` of type `{source_ty}` cannot feed `{target_port}` of type `{target_ty}`")]
    ConnectionMismatch {
        connection: SmolStr,
        source_port: String,
        source_ty: Type,
        target_port: String,
        target_ty: Type,
        span: Span,
    },
}

fn did_you_mean(similar: &[String]) -> String {
    if similar.is_empty() {
        return String::new();
    }
    let names: Vec<String> = similar.iter().map(|n| format!("`{n}`")).collect();
    format!("; did you mean {}?", names.join(" or "))
}

impl TypeError {
    pub fn span(&self) -> Span {
        match self {
            TypeError::Mismatch { span, .. }
            | TypeError::Redeclaration { span, .. }
            | TypeError::UndefinedVariable { span, .. }
            | TypeError::NotAFunction { span, .. }
            | TypeError::ArityMismatch { span, .. }
            | TypeError::ConditionNotBool { span, .. }
            | TypeError::NotIterable { span, .. }
            | TypeError::NonNumericOperand { span, .. }
            | TypeError::Incomparable { span, .. }
            | TypeError::NoSuchField { span, .. }
            | TypeError::NotIndexable { span, .. }
            | TypeError::IndexNotInt { span, .. }
            | TypeError::HeterogeneousList { span, .. }
            | TypeError::DuplicateRecordField { span, .. }
            | TypeError::ReturnMismatch { span, .. }
            | TypeError::ReturnOutsideFunction { span }
            | TypeError::LoopControlOutsideLoop { span, .. }
            | TypeError::DuplicateAgent { span, .. }
            | TypeError::ModelNameNotStr { span, .. }
            | TypeError::UnknownTemplateInput { span, .. }
            | TypeError::UnknownTemplateOutput { span, .. }
            | TypeError::InvalidTemplate { span, .. }
            | TypeError::UndeclaredPort { span, .. }
            | TypeError::ConnectionMismatch { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TypeError::Mismatch { .. } => "T0001",
            TypeError::Redeclaration { .. } => "T0002",
            TypeError::UndefinedVariable { .. } => "T0003",
            TypeError::NotAFunction { .. } => "T0004",
            TypeError::ArityMismatch { .. } => "T0005",
            TypeError::ConditionNotBool { .. } => "T0006",
            TypeError::NotIterable { .. } => "T0007",
            TypeError::NonNumericOperand { .. } => "T0008",
            TypeError::Incomparable { .. } => "T0009",
            TypeError::NoSuchField { .. } => "T0010",
            TypeError::NotIndexable { .. } => "T0011",
            TypeError::IndexNotInt { .. } => "T0012",
            TypeError::HeterogeneousList { .. } => "T0013",
            TypeError::DuplicateRecordField { .. } => "T0014",
            TypeError::ReturnMismatch { .. } => "T0015",
            TypeError::ReturnOutsideFunction { .. } => "T0016",
            TypeError::LoopControlOutsideLoop { .. } => "T0017",
            TypeError::DuplicateAgent { .. } => "T0018",
            TypeError::ModelNameNotStr { .. } => "T0019",
            TypeError::UnknownTemplateInput { .. } => "T0020",
            TypeError::UnknownTemplateOutput { .. } => "T0021",
            TypeError::InvalidTemplate { .. } => "T0022",
            TypeError::UndeclaredPort { .. } => "T0023",
            TypeError::ConnectionMismatch { .. } => "T0024",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        self.span()
            .locate(Diagnostic::new(Stage::Type, self.code(), self.to_string()))
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// What looking up an undefined name does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupPolicy {
    /// The name silently has type `any`.
    #[default]
    Permissive,
    /// An `UndefinedVariable` error is reported; the name still types as `any`.
    Strict,
}

// ============================================================================
// Checker
// ============================================================================

struct FunctionContext {
    name: SmolStr,
    returns: Vec<Type>,
}

pub struct TypeChecker {
    graph: TypeGraph,
    env: TypeEnvironment,
    agent_io: IndexMap<String, Type>,
    globals: Scope,
    policy: LookupPolicy,
    errors: Vec<TypeError>,
    function: Option<FunctionContext>,
    loop_depth: usize,
    agents: FxHashSet<SmolStr>,
}

impl TypeChecker {
    /// A checker over the built-in type graph with the built-in functions
    /// bound in the root scope.
    pub fn new() -> Result<Self, TypeParseError> {
        Self::with_graph(TypeGraph::with_builtins())
    }

    pub fn with_graph(graph: TypeGraph) -> Result<Self, TypeParseError> {
        let mut env = TypeEnvironment::new();
        for (name, signature) in builtins::builtin_functions()? {
            env.define(name, signature);
        }
        Ok(Self {
            graph,
            env,
            agent_io: IndexMap::new(),
            globals: Scope::default(),
            policy: LookupPolicy::default(),
            errors: Vec::new(),
            function: None,
            loop_depth: 0,
            agents: FxHashSet::default(),
        })
    }

    pub fn with_policy(mut self, policy: LookupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Binds an extra function given as type text, e.g. `(str) -> int`.
    pub fn declare_builtin(&mut self, name: &str, signature: &str) -> Result<(), TypeParseError> {
        let ty = pllm_types::parse_type(signature, &Aliases::default())?;
        self.env.define(name, ty);
        Ok(())
    }

    /// Port types by `Agent.input.field` / `Agent.output.field`, in
    /// declaration order.
    pub fn agent_io(&self) -> &IndexMap<String, Type> {
        &self.agent_io
    }

    /// Bindings of the program's top-level scope after the last check.
    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    /// Checks a whole program and returns its errors in source order.
    #[instrument(skip_all, fields(items = program.items.len()))]
    pub fn check_program(&mut self, program: &Program) -> Vec<TypeError> {
        self.agents.clear();
        self.agent_io.clear();
        self.env.enter_scope();

        for func in program.functions() {
            self.env.define(func.name.node.clone(), func.signature());
        }

        for item in &program.items {
            match item {
                TopLevelItem::Statement(stmt) => self.check_statement(stmt),
                TopLevelItem::Agent(agent) => self.check_agent(agent),
                TopLevelItem::Function(func) => self.check_function(func),
                TopLevelItem::Connect(_) => {}
            }
        }

        for connection in program.connections() {
            self.check_connection(connection);
        }

        self.globals = self.env.exit_scope().unwrap_or_default();
        let mut errors = std::mem::take(&mut self.errors);
        errors.sort_by_key(|error| error.span().start.offset);
        debug!(errors = errors.len(), ports = self.agent_io.len(), "checked program");
        errors
    }

    fn report(&mut self, error: TypeError) {
        warn!(%error, "type error");
        self.errors.push(error);
    }

    fn compatible(&self, found: &Type, expected: &Type) -> bool {
        found.compatible(expected, &self.graph)
    }

    /// Expects `found` to be usable where `expected` is required.
    fn expect_type(&mut self, found: &Type, expected: &Type, span: Span) -> bool {
        if self.compatible(found, expected) {
            return true;
        }
        self.report(TypeError::Mismatch {
            expected: expected.clone(),
            found: found.clone(),
            span,
        });
        false
    }

    fn in_scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.env.enter_scope();
        let result = f(self);
        self.env.exit_scope();
        result
    }

    fn in_loop(&mut self, f: impl FnOnce(&mut Self)) {
        self.loop_depth += 1;
        self.in_scope(f);
        self.loop_depth -= 1;
    }

    fn check_block(&mut self, statements: &[Statement]) {
        self.in_scope(|checker| {
            for stmt in statements {
                checker.check_statement(stmt);
            }
        });
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Binds `name` in the innermost scope.
    ///
    /// An existing binding of a concrete type must agree with the declared
    /// type and accept the value; an existing `any` binding accepts anything.
    fn bind(&mut self, name: &Ident, declared: Option<&TypeAnnotation>, value: Type, span: Span) {
        let previous = self.env.lookup(&name.node).cloned();

        match previous {
            Some(previous) if !previous.is_any() => {
                if let Some(declared) = declared {
                    if !declared.ty.is_equivalent(&previous, &self.graph) {
                        self.report(TypeError::Redeclaration {
                            name: name.node.clone(),
                            previous,
                            declared: declared.ty.clone(),
                            span: declared.span,
                        });
                        return;
                    }
                }
                self.expect_type(&value, &previous, span);
                self.env.define(name.node.clone(), previous);
            }
            Some(_) => match declared {
                Some(declared) => {
                    self.expect_type(&value, &declared.ty, span);
                    self.env.define(name.node.clone(), declared.ty.clone());
                }
                None => self.env.define(name.node.clone(), Type::Any),
            },
            None => match declared {
                Some(declared) => {
                    self.expect_type(&value, &declared.ty, span);
                    self.env.define(name.node.clone(), declared.ty.clone());
                }
                None => self.env.define(name.node.clone(), value),
            },
        }
    }

    fn check_var_decl(&mut self, decl: &VarDecl) {
        let value = match &decl.default {
            Some(default) => self.type_of(default),
            None => Type::Any,
        };
        let span = decl.default.as_ref().map_or(decl.span, HasSpan::span);
        self.bind(&decl.name, Some(&decl.ty), value, span);
    }

    fn check_agent(&mut self, agent: &AgentDef) {
        debug!(agent = %agent.name.node, "checking agent");
        if !self.agents.insert(agent.name.node.clone()) {
            self.report(TypeError::DuplicateAgent {
                name: agent.name.node.clone(),
                span: agent.name.span,
            });
        }

        self.in_scope(|checker| {
            for item in &agent.body {
                match item {
                    AgentItem::Input(block) | AgentItem::Output(block) | AgentItem::Memory(block) => {
                        for decl in &block.decls {
                            checker.check_var_decl(decl);
                        }
                    }
                    AgentItem::Model(model) => {
                        let found = checker.type_of(&model.name);
                        if !checker.compatible(&found, &Type::str()) {
                            checker.report(TypeError::ModelNameNotStr {
                                found,
                                span: model.name.span(),
                            });
                        }
                    }
                    AgentItem::Chat(_) => {}
                    AgentItem::Statement(stmt) => checker.check_statement(stmt),
                }
            }

            if let Some(chat) = agent.chat() {
                checker.check_chat(agent, chat);
            }
        });

        let name = &agent.name.node;
        for decl in agent.inputs() {
            let key = port_key(name, PortDirection::Input, &decl.name.node);
            self.agent_io.insert(key, decl.ty.ty.clone());
        }
        for decl in agent.outputs() {
            let key = port_key(name, PortDirection::Output, &decl.name.node);
            self.agent_io.insert(key, decl.ty.ty.clone());
        }
    }

    /// `{v}` must name a visible variable and `${v}` a declared output.
    /// Runs with the agent's scope still open.
    fn check_chat(&mut self, agent: &AgentDef, chat: &ChatBlock) {
        let processed = match pllm_template::process_template(&chat.template) {
            Ok(processed) => processed,
            Err(err) => {
                self.report(TypeError::InvalidTemplate {
                    message: err.to_string(),
                    span: chat.span,
                });
                return;
            }
        };

        for name in processed.inputs {
            if !self.env.is_defined(&name) {
                self.report(TypeError::UnknownTemplateInput {
                    name,
                    span: chat.span,
                });
            }
        }
        for name in processed.outputs {
            if !agent.outputs().any(|decl| decl.name.node == name) {
                self.report(TypeError::UnknownTemplateOutput {
                    name,
                    span: chat.span,
                });
            }
        }
    }

    fn check_function(&mut self, func: &FuncDef) {
        let outer_function = self.function.replace(FunctionContext {
            name: func.name.node.clone(),
            returns: func.return_types(),
        });
        let outer_loops = std::mem::take(&mut self.loop_depth);

        self.in_scope(|checker| {
            for param in &func.params {
                checker.env.define(param.name.node.clone(), param.ty.ty.clone());
            }
            for stmt in &func.body {
                checker.check_statement(stmt);
            }
        });

        self.loop_depth = outer_loops;
        self.function = outer_function;
    }

    /// Source and target ports must both exist, the source must feed the
    /// target, and the declared edge type must sit between the two. At most
    /// one error per connection.
    fn check_connection(&mut self, connection: &Connection) {
        let source_port = connection.source.key();
        let target_port = connection.target.key();
        let source = self.agent_io.get(&source_port).cloned();
        let target = self.agent_io.get(&target_port).cloned();

        let (source_ty, target_ty) = match (source, target) {
            (Some(source), Some(target)) => (source, target),
            (source, target) => {
                if source.is_none() {
                    self.report(TypeError::UndeclaredPort {
                        port: source_port,
                        span: connection.source.span,
                    });
                }
                if target.is_none() {
                    self.report(TypeError::UndeclaredPort {
                        port: target_port,
                        span: connection.target.span,
                    });
                }
                return;
            }
        };

        if !self.compatible(&source_ty, &target_ty) {
            self.report(TypeError::ConnectionMismatch {
                connection: connection.name.node.clone(),
                source_port,
                source_ty,
                target_port,
                target_ty,
                span: connection.span,
            });
        } else if self.expect_type(&source_ty, &connection.ty.ty, connection.ty.span) {
            self.expect_type(&connection.ty.ty, &target_ty, connection.ty.span);
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn check_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Assign(assign) => self.check_assign(assign),
            Statement::Return(ret) => self.check_return(ret),
            Statement::If(stmt) => {
                self.check_condition(&stmt.condition, "If");
                self.check_block(&stmt.then_branch);
                for branch in &stmt.elif_branches {
                    self.check_condition(&branch.condition, "If");
                    self.check_block(&branch.body);
                }
                if let Some(else_branch) = &stmt.else_branch {
                    self.check_block(else_branch);
                }
            }
            Statement::While(stmt) => {
                self.check_condition(&stmt.condition, "While");
                self.in_loop(|checker| {
                    for inner in &stmt.body {
                        checker.check_statement(inner);
                    }
                });
            }
            Statement::For(stmt) => self.check_for(stmt),
            Statement::Break(span) => self.check_loop_control("break", *span),
            Statement::Continue(span) => self.check_loop_control("continue", *span),
            // Aliases were resolved while parsing.
            Statement::TypeDef(_) => {}
            Statement::Expr(stmt) => {
                self.type_of(&stmt.expr);
            }
        }
    }

    fn check_assign(&mut self, assign: &AssignStmt) {
        let value = self.type_of(&assign.value);
        let value_span = assign.value.span();

        match &assign.target {
            AssignTarget::Name(name) => self.bind(name, assign.ty.as_ref(), value, value_span),
            AssignTarget::Field(access) => {
                let field_ty = self.type_of_field(access);
                self.expect_type(&value, &field_ty, value_span);
            }
            AssignTarget::Index(access) => {
                let element_ty = self.type_of_index(access);
                self.expect_type(&value, &element_ty, value_span);
            }
        }
    }

    fn check_return(&mut self, ret: &ReturnStmt) {
        let values: Vec<Type> = ret.values.iter().map(|value| self.type_of(value)).collect();
        let Some(function) = &self.function else {
            self.report(TypeError::ReturnOutsideFunction { span: ret.span });
            return;
        };

        let found = Type::returns_as_value(&values);
        let expected = Type::returns_as_value(&function.returns);
        if !self.compatible(&found, &expected) {
            let function = function.name.clone();
            self.report(TypeError::ReturnMismatch {
                function,
                expected,
                found,
                span: ret.span,
            });
        }
    }

    fn check_condition(&mut self, condition: &Expression, construct: &'static str) {
        let found = self.type_of(condition);
        if !found.is_any() && !found.is_equivalent(&Type::bool(), &self.graph) {
            self.report(TypeError::ConditionNotBool {
                construct,
                found,
                span: condition.span(),
            });
        }
    }

    fn check_for(&mut self, stmt: &ForStmt) {
        let iterable = self.type_of(&stmt.iterable);
        let element = match iterable.resolved() {
            Type::List(element) => (**element).clone(),
            Type::Any => Type::Any,
            _ => {
                self.report(TypeError::NotIterable {
                    found: iterable.clone(),
                    span: stmt.iterable.span(),
                });
                Type::Any
            }
        };

        let var_ty = match self.env.lookup(&stmt.var.node).cloned() {
            Some(previous) if !previous.is_any() => {
                self.expect_type(&element, &previous, stmt.var.span);
                previous
            }
            _ => element,
        };

        self.in_loop(|checker| {
            checker.env.define(stmt.var.node.clone(), var_ty);
            for inner in &stmt.body {
                checker.check_statement(inner);
            }
        });
    }

    fn check_loop_control(&mut self, keyword: &'static str, span: Span) {
        if self.loop_depth == 0 {
            self.report(TypeError::LoopControlOutsideLoop { keyword, span });
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// The type of `expr`; `any` after an error.
    pub fn type_of(&mut self, expr: &Expression) -> Type {
        match expr {
            Expression::Identifier(ident) => self.lookup(ident),
            Expression::Constant(constant) => constant.value.ty(),
            Expression::BinaryOp(op) => self.type_of_binary(op),
            Expression::FuncCall(call) => self.type_of_call(call),
            Expression::List(list) => self.type_of_list(list),
            Expression::Record(record) => self.type_of_record(record),
            Expression::FieldAccess(access) => self.type_of_field(access),
            Expression::IndexAccess(access) => self.type_of_index(access),
            Expression::Error(_) => Type::Any,
        }
    }

    fn lookup(&mut self, ident: &Ident) -> Type {
        if let Some(ty) = self.env.lookup(&ident.node) {
            return ty.clone();
        }
        if self.policy == LookupPolicy::Strict {
            let similar = self.similar_names(&ident.node);
            self.report(TypeError::UndefinedVariable {
                name: ident.node.clone(),
                similar,
                span: ident.span,
            });
        }
        Type::Any
    }

    /// Up to three visible names close to `name`, nearest first.
    fn similar_names(&self, name: &str) -> Vec<String> {
        let threshold = std::cmp::max(2, name.len() / 3);
        let mut seen = FxHashSet::default();
        let mut matches: Vec<(usize, &str)> = self
            .env
            .names()
            .filter(|candidate| seen.insert(candidate.as_str()))
            .filter_map(|candidate| {
                let distance = strsim::levenshtein(name, candidate);
                (distance <= threshold).then_some((distance, candidate.as_str()))
            })
            .collect();
        matches.sort();
        matches
            .into_iter()
            .take(3)
            .map(|(_, candidate)| candidate.to_string())
            .collect()
    }

    fn type_of_binary(&mut self, op: &BinaryOp) -> Type {
        let left = self.type_of(&op.left);
        let right = self.type_of(&op.right);

        if op.op.is_comparison() {
            if !self.compatible(&left, &right) && !self.compatible(&right, &left) {
                self.report(TypeError::Incomparable {
                    op: op.op,
                    left,
                    right,
                    span: op.span,
                });
            }
            return Type::bool();
        }

        let mut valid = true;
        for (operand, ty) in [(&op.left, &left), (&op.right, &right)] {
            if !ty.is_any() && !ty.is_numeric(&self.graph) {
                self.report(TypeError::NonNumericOperand {
                    op: op.op,
                    found: ty.clone(),
                    span: operand.span(),
                });
                valid = false;
            }
        }

        if !valid || left.is_any() || right.is_any() {
            Type::Any
        } else if left.is_equivalent(&Type::float(), &self.graph)
            || right.is_equivalent(&Type::float(), &self.graph)
        {
            Type::float()
        } else {
            Type::int()
        }
    }

    fn type_of_call(&mut self, call: &FuncCall) -> Type {
        let args: Vec<Type> = call.args.iter().map(|arg| self.type_of(arg)).collect();
        let callee = self.lookup(&call.callee);

        match callee.resolved() {
            Type::Any => Type::Any,
            Type::Function { params, returns } => {
                if params.len() != args.len() {
                    self.report(TypeError::ArityMismatch {
                        name: call.callee.node.clone(),
                        expected: params.len(),
                        found: args.len(),
                        span: call.span,
                    });
                } else {
                    for ((arg, found), expected) in call.args.iter().zip(&args).zip(params) {
                        self.expect_type(found, expected, arg.span());
                    }
                }
                Type::returns_as_value(returns)
            }
            _ => {
                self.report(TypeError::NotAFunction {
                    name: call.callee.node.clone(),
                    found: callee.clone(),
                    span: call.callee.span,
                });
                Type::Any
            }
        }
    }

    /// Elements must all be equivalent; `any` elements are skipped. An empty
    /// literal has no element type to offer and is `any`.
    fn type_of_list(&mut self, list: &ListExpr) -> Type {
        let mut element: Option<Type> = None;
        let mut consistent = true;

        for item in &list.elements {
            let ty = self.type_of(item);
            if ty.is_any() || !consistent {
                continue;
            }
            match &element {
                None => element = Some(ty),
                Some(first) if first.is_equivalent(&ty, &self.graph) => {}
                Some(first) => {
                    let first = first.clone();
                    self.report(TypeError::HeterogeneousList {
                        first,
                        other: ty,
                        span: item.span(),
                    });
                    consistent = false;
                }
            }
        }

        match element {
            Some(element) if consistent => Type::list(element),
            Some(_) => Type::Any,
            None if list.elements.is_empty() => Type::Any,
            None => Type::list(Type::Any),
        }
    }

    fn type_of_record(&mut self, record: &RecordExpr) -> Type {
        let mut fields: Vec<(SmolStr, Type)> = Vec::with_capacity(record.fields.len());
        for field in &record.fields {
            let ty = self.type_of(&field.value);
            if fields.iter().any(|(name, _)| *name == field.name.node) {
                self.report(TypeError::DuplicateRecordField {
                    name: field.name.node.clone(),
                    span: field.name.span,
                });
                continue;
            }
            fields.push((field.name.node.clone(), ty));
        }
        Type::record(fields)
    }

    fn type_of_field(&mut self, access: &FieldAccess) -> Type {
        let object = self.type_of(&access.object);
        match object.resolved() {
            Type::Any => Type::Any,
            Type::Record(fields) => match fields.get(&access.field.node) {
                Some(ty) => ty.clone(),
                None => {
                    self.report(TypeError::NoSuchField {
                        field: access.field.node.clone(),
                        ty: object.clone(),
                        span: access.field.span,
                    });
                    Type::Any
                }
            },
            _ => {
                self.report(TypeError::NoSuchField {
                    field: access.field.node.clone(),
                    ty: object.clone(),
                    span: access.field.span,
                });
                Type::Any
            }
        }
    }

    fn type_of_index(&mut self, access: &IndexAccess) -> Type {
        let object = self.type_of(&access.object);
        let index = self.type_of(&access.index);

        match object.resolved() {
            Type::Any => Type::Any,
            Type::List(element) => {
                let element = (**element).clone();
                if !index.is_any() && !index.is_equivalent(&Type::int(), &self.graph) {
                    self.report(TypeError::IndexNotInt {
                        found: index,
                        span: access.index.span(),
                    });
                }
                element
            }
            _ => {
                self.report(TypeError::NotIndexable {
                    found: object.clone(),
                    span: access.object.span(),
                });
                Type::Any
            }
        }
    }
}

/// Checks `program` with the default configuration.
pub fn check_program(program: &Program) -> Result<Vec<TypeError>, TypeParseError> {
    Ok(TypeChecker::new()?.check_program(program))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn check_with(policy: LookupPolicy, source: &str) -> Vec<String> {
        let (program, parse_errors) = pllm_parser::parse(source);
        assert!(parse_errors.is_empty(), "parse errors: {parse_errors:#?}");
        TypeChecker::new()
            .unwrap()
            .with_policy(policy)
            .check_program(&program)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn check(source: &str) -> Vec<String> {
        check_with(LookupPolicy::Permissive, source)
    }

    #[test]
    fn test_annotated_assignment() {
        assert!(check("x: float = 1\n").is_empty());
        assert_eq!(
            check("x: int = \"a\"\n"),
            ["Type mismatch: expected `int`, found `str`"]
        );
    }

    #[test]
    fn test_inferred_binding_is_enforced_later() {
        assert_eq!(
            check("x = 1\nx = \"s\"\n"),
            ["Type mismatch: expected `int`, found `str`"]
        );
        assert!(check("x = 1.5\nx = 2\n").is_empty());
    }

    #[test]
    fn test_redeclaration_must_be_equivalent() {
        assert_eq!(
            check("x: int = 1\nx: str = \"a\"\n"),
            ["Cannot redeclare `x` of type `int` as `str`"]
        );
    }

    #[test]
    fn test_any_binding_accepts_anything() {
        assert!(check("x: any = 1\nx: int = 2\n").is_empty());
        assert!(check("y: any = 1\ny = \"s\"\ny = [1]\n").is_empty());
    }

    #[test]
    fn test_arithmetic_result_types() {
        let errors = check("a: int = 1 + 2\nb: int = 1 + 2.0\nc: float = 1 * 2\n");
        assert_eq!(errors, ["Type mismatch: expected `int`, found `float`"]);
        assert_eq!(
            check("d = \"x\" + 1\n"),
            ["Operator `+` requires numeric operands, found `str`"]
        );
    }

    #[test]
    fn test_comparison() {
        assert!(check("ok: bool = 1 < 2.5\n").is_empty());
        assert_eq!(
            check("bad = \"a\" == 1\n"),
            ["Cannot compare `str` with `int` using `==`"]
        );
    }

    #[test]
    fn test_conditions_must_be_bool() {
        assert!(check("if 1 < 2:\n    x = 1\n").is_empty());
        assert_eq!(
            check("while 1:\n    x = 1\n"),
            ["Condition of While must be `bool`, found `int`"]
        );
        assert_eq!(
            check("if True:\n    x = 1\nelif \"s\":\n    x = 2\n"),
            ["Condition of If must be `bool`, found `str`"]
        );
    }

    #[test]
    fn test_branches_have_their_own_scope() {
        assert!(check("if True:\n    x = 1\nelse:\n    x = \"s\"\n").is_empty());
    }

    #[test]
    fn test_for_loop() {
        assert!(check("total = 0\nfor n in [1, 2, 3]:\n    total = total + n\n").is_empty());
        assert_eq!(
            check("for c in 5:\n    x = c\n"),
            ["Cannot iterate over `int`, expected a list"]
        );
        assert_eq!(
            check("n: int = 0\nfor n in [\"a\"]:\n    x = n\n"),
            ["Type mismatch: expected `int`, found `str`"]
        );
    }

    #[test]
    fn test_loop_control_context() {
        assert_eq!(check("break\n"), ["`break` outside of a loop"]);
        assert_eq!(
            check("fun f():\n    continue\n"),
            ["`continue` outside of a loop"]
        );
        assert!(check("while True:\n    if True:\n        break\n    continue\n").is_empty());
    }

    #[test]
    fn test_functions() {
        let source = "fun add(a: int, b: int) -> int:\n    return a + b\ns: int = add(1, 2)\n";
        assert!(check(source).is_empty());

        assert_eq!(
            check("fun f(a: int) -> str:\n    return a\n"),
            ["Return type mismatch in `f`: expected `str`, found `int`"]
        );
        assert_eq!(check("return 1\n"), ["`return` outside of a function"]);
    }

    #[test]
    fn test_recursion_and_hoisting() {
        let source = "x = later(1)\nfun later(n: int) -> int:\n    return later(n - 1)\n";
        assert!(check(source).is_empty());
    }

    #[test]
    fn test_multiple_returns_are_a_record() {
        let source = "fun pair() -> (int, str):\n    return 1, \"a\"\np = pair()\nn: int = p._0\n";
        assert!(check(source).is_empty());
    }

    #[test]
    fn test_calls() {
        assert_eq!(
            check("x = read_file(1)\n"),
            ["Type mismatch: expected `str`, found `int`"]
        );
        assert_eq!(
            check("write_file(\"a\")\n"),
            ["`write_file` expects 2 argument(s), found 1"]
        );
        assert_eq!(
            check("n = 1\nn(2)\n"),
            ["`n` is not a function, it has type `int`"]
        );
        assert!(check("lines: list[str] = read_lines(\"f\")\n").is_empty());
    }

    #[test]
    fn test_list_literals_require_equal_types() {
        assert!(check("xs: list[int] = [1, 2]\n").is_empty());
        assert_eq!(
            check("xs = [1, 2.0]\n"),
            ["List elements must all have the same type: found `int` and `float`"]
        );
        assert!(check("xs: list[str] = []\n").is_empty());
    }

    #[test]
    fn test_records() {
        let source = "r: record{name: str} = {name = \"a\", age = 3}\nn: str = r.name\n";
        assert!(check(source).is_empty());
        assert_eq!(
            check("r = {a = 1, a = 2}\n"),
            ["Duplicate field `a` in record literal"]
        );
        assert_eq!(
            check("r = {a = 1}\nx = r.b\n"),
            ["Type `record{a: int}` has no field `b`"]
        );
    }

    #[test]
    fn test_field_and_index_assignment() {
        let source = "r = {score = 1.0}\nr.score = 2\nxs = [1]\nxs[0] = 3\n";
        assert!(check(source).is_empty());
        assert_eq!(
            check("xs = [1]\nxs[\"a\"] = 2\n"),
            ["List index must be `int`, found `str`"]
        );
        assert_eq!(check("n = 1\nn[0] = 2\n"), ["Cannot index into `int`"]);
    }

    #[test]
    fn test_lookup_policy() {
        assert!(check("x = missing + 1\n").is_empty());
        assert_eq!(
            check_with(LookupPolicy::Strict, "counter = 1\ny = countr + 1\n"),
            ["Undefined variable: `countr`; did you mean `counter`?"]
        );
    }

    #[test]
    fn test_agent_blocks() {
        let source = r#"
agent Writer:
    input: { topic: str }
    output: { draft: str }
    memory: { revisions: int = "none" }
    model: 4
    chat: """About {topic} and {style}: ${draft} ${title}"""
"#;
        assert_eq!(
            check(source),
            [
                "Type mismatch: expected `int`, found `str`",
                "Model name must be `str`, found `int`",
                "Chat template uses `{style}` but no such variable is visible",
                "Chat template uses `${title}` but the agent has no such output",
            ]
        );
    }

    #[test]
    fn test_duplicate_agents() {
        let source = "agent A: model: \"m\"\nagent A: model: \"n\"\n";
        assert_eq!(check(source), ["Agent `A` is already defined"]);
    }

    #[test]
    fn test_agent_io_keys() {
        let (program, _) = pllm_parser::parse(
            "agent A:\n    input: { q: str }\n    output: { a: list[str], n: int }\n",
        );
        let mut checker = TypeChecker::new().unwrap();
        assert!(checker.check_program(&program).is_empty());
        let keys: Vec<_> = checker.agent_io().keys().cloned().collect();
        assert_eq!(keys, ["A.input.q", "A.output.a", "A.output.n"]);
        assert_eq!(checker.agent_io()["A.output.a"], Type::list(Type::str()));
    }

    #[test]
    fn test_globals_survive_the_check() {
        let (program, _) = pllm_parser::parse("limit = 3\nfun f():\n    inner = 1\n");
        let mut checker = TypeChecker::new().unwrap();
        checker.check_program(&program);
        assert_eq!(checker.globals().get("limit"), Some(&Type::int()));
        assert!(checker.globals().contains_key("f"));
        assert!(!checker.globals().contains_key("inner"));
    }

    #[test]
    fn test_declare_builtin() {
        let mut checker = TypeChecker::new().unwrap();
        checker.declare_builtin("count_words", "(str) -> int").unwrap();
        assert_eq!(
            checker.declare_builtin("bad", "(str) -> integer"),
            Err(TypeParseError::UnknownType("(str) -> integer".to_string()))
        );
    }

    #[test]
    fn test_errors_become_diagnostics() {
        let (program, _) = pllm_parser::parse("x: int = \"a\"\n");
        let errors = check_program(&program).unwrap();
        insta::assert_snapshot!(
            errors[0].to_diagnostic().to_string(),
            @"type error[T0001] at 1:10-1:13: Type mismatch: expected `int`, found `str`"
        );
    }
}
