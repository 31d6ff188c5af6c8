//! Error recovery: one run reports every independent syntax error and keeps
//! the surrounding structure.

use pllm_ast::{AgentItem, Expression, Statement, TopLevelItem};
use pllm_parser::{parse, ParseError};
use pretty_assertions::assert_eq;

fn messages(errors: &[ParseError]) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}

#[test]
fn two_broken_agents_give_two_diagnostics() {
    let source = r#"
agent A:
    input:
        x int
    output:
        y: str

agent B:
    input:
        q: str
    model: 42 +
    chat: """Answer {q} with ${r}"""
"#;
    let (program, errors) = parse(source);

    assert_eq!(
        messages(&errors),
        [
            "Invalid variable declaration in input block",
            "Invalid model name",
        ]
    );

    let names: Vec<_> = program.agents().map(|a| a.name.node.as_str()).collect();
    assert_eq!(names, ["A", "B"]);

    let a = program.agents().next().unwrap();
    assert_eq!(a.inputs().count(), 0);
    assert_eq!(a.outputs().count(), 1);

    let b = program.agents().nth(1).unwrap();
    assert!(matches!(b.model().map(|m| &m.name), Some(Expression::Error(_))));
    assert!(b.chat().is_some());
}

#[test]
fn diagnostics_point_at_the_offending_line() {
    let source = "agent A:\n    input:\n        x int\nagent B:\n    model: 42 +\n";
    let (_, errors) = parse(source);
    let lines: Vec<_> = errors
        .iter()
        .map(|e| e.to_diagnostic().start.line)
        .collect();
    assert_eq!(lines, [3, 5]);
}

#[test]
fn bad_statement_does_not_swallow_the_block() {
    let source = "fun f(a: int) -> int:\n    x = a +\n    y = a * 2\n    return y\n";
    let (program, errors) = parse(source);
    assert_eq!(errors.len(), 1);

    let func = program.functions().next().unwrap();
    assert!(matches!(func.body.last(), Some(Statement::Return(_))));
}

#[test]
fn unexpected_indent_at_top_level() {
    let source = "x = 1\n    y = 2\nz = 3\n";
    let (program, errors) = parse(source);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ParseError::UnexpectedToken { .. }));
    assert_eq!(program.items.len(), 2);
}

#[test]
fn recovery_inside_nested_suites() {
    let source = r#"
agent Loop:
    output: { n: int }
    while n < :
        n = n + 1
    for i in :
        n = i
    if n == 1:
        n = )
"#;
    let (program, errors) = parse(source);
    assert_eq!(
        messages(&errors),
        [
            "Invalid condition of While",
            "Invalid iterable in For",
            "Invalid expression in assignment",
        ]
    );
    let agent = program.agents().next().unwrap();
    let statements = agent
        .body
        .iter()
        .filter(|item| matches!(item, AgentItem::Statement(_)))
        .count();
    assert_eq!(statements, 3);
}

#[test]
fn every_item_kind_survives_a_bad_neighbour() {
    let source = "type T = int\nglobal g\nfun f():\n    return 1\nconnect:\n    c: T A.output.x -> B.input.y\n";
    let (program, errors) = parse(source);
    assert_eq!(messages(&errors), ["`global` is a reserved word"]);

    let kinds: Vec<_> = program
        .items
        .iter()
        .map(|item| match item {
            TopLevelItem::Statement(_) => "statement",
            TopLevelItem::Agent(_) => "agent",
            TopLevelItem::Connect(_) => "connect",
            TopLevelItem::Function(_) => "function",
        })
        .collect();
    assert_eq!(kinds, ["statement", "function", "connect"]);
}

#[test]
fn parse_errors_become_diagnostics() {
    let (_, errors) = parse("agent A:\n    model: +\n");
    insta::assert_snapshot!(
        errors[0].to_diagnostic().to_string(),
        @"parse error[P0004] at 2:12-2:13: Invalid model name"
    );
}
