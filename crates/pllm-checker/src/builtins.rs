//! Functions every program can call without declaring them.

use pllm_ast::Type;
use pllm_types::{parse_type, Aliases, TypeParseError};

const SIGNATURES: &[(&str, &str)] = &[
    ("read_file", "(str) -> str"),
    ("write_file", "(str, str) -> unit"),
    ("append_file", "(str, str) -> unit"),
    ("read_lines", "(str) -> list[str]"),
    ("write_lines", "(str, list[str]) -> unit"),
    ("int_to_str", "(int) -> str"),
    ("str_to_int", "(str) -> int"),
];

/// Built-in function names with their parsed signatures.
pub fn builtin_functions() -> Result<Vec<(&'static str, Type)>, TypeParseError> {
    let aliases = Aliases::default();
    SIGNATURES
        .iter()
        .map(|(name, signature)| Ok((*name, parse_type(signature, &aliases)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_signatures_parse() {
        let builtins = builtin_functions().unwrap();
        assert_eq!(builtins.len(), SIGNATURES.len());
        assert!(builtins
            .iter()
            .all(|(_, ty)| matches!(ty, Type::Function { .. })));
    }

    #[test]
    fn test_read_lines_signature() {
        let builtins = builtin_functions().unwrap();
        let (_, ty) = builtins.iter().find(|(n, _)| *n == "read_lines").unwrap();
        assert_eq!(ty, &Type::function(vec![Type::str()], vec![Type::list(Type::str())]));
    }
}
