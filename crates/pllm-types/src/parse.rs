//! The textual type-name grammar.
//!
//! ```text
//! type   := name
//!         | "list" "[" type "]"
//!         | "tuple" "[" types "]"
//!         | "union" "[" types "]"
//!         | "record" "{" (ident ":" type),* "}"
//!         | "(" types? ")" "->" ( "(" types? ")" | type )
//! name   := int | float | str | bool | unit | void | any | <alias>
//! ```

use crate::{Aliases, Type};
use smol_str::SmolStr;
use thiserror::Error;

/// Failure to read a type annotation. Fatal for the declaration using it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("Unknown type `{0}`")]
    UnknownType(String),
}

/// Parses `text` as a type, resolving alias names through `aliases`.
pub fn parse_type(text: &str, aliases: &Aliases) -> Result<Type, TypeParseError> {
    let mut cursor = Cursor {
        text,
        pos: 0,
        aliases,
    };
    let ty = cursor.parse().ok_or_else(|| unknown(text))?;
    cursor.skip_ws();
    if cursor.pos != text.len() {
        return Err(unknown(text));
    }
    Ok(ty)
}

fn unknown(text: &str) -> TypeParseError {
    TypeParseError::UnknownType(text.trim().to_string())
}

/// Built-in names accepted by [`parse_type`].
pub fn builtin(name: &str) -> Option<Type> {
    match name {
        "int" | "float" | "str" | "bool" | "unit" | "void" => Some(Type::basic(name)),
        "any" => Some(Type::Any),
        _ => None,
    }
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    aliases: &'a Aliases,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let text = self.text;
        let rest = &text[self.pos..];
        let first = rest.chars().next()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let start = self.pos;
        self.pos += len;
        Some(&text[start..start + len])
    }

    fn parse(&mut self) -> Option<Type> {
        if self.eat("(") {
            let params = self.list_until(")")?;
            if !self.eat("->") {
                return None;
            }
            let returns = if self.eat("(") {
                self.list_until(")")?
            } else {
                vec![self.parse()?]
            };
            return Some(Type::function(params, returns));
        }

        let name = self.ident()?;
        match name {
            "list" => {
                if !self.eat("[") {
                    return None;
                }
                let element = self.parse()?;
                self.eat("]").then(|| Type::list(element))
            }
            "tuple" => {
                if !self.eat("[") {
                    return None;
                }
                self.list_until("]").map(Type::tuple)
            }
            "union" => {
                if !self.eat("[") {
                    return None;
                }
                self.list_until("]").map(Type::union)
            }
            "record" => {
                if !self.eat("{") {
                    return None;
                }
                self.fields()
            }
            other => builtin(other).or_else(|| {
                self.aliases
                    .get(other)
                    .map(|target| Type::alias(other, target.clone()))
            }),
        }
    }

    /// Comma-separated types up to `close`; empty lists are allowed.
    fn list_until(&mut self, close: &str) -> Option<Vec<Type>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Some(items);
        }
        loop {
            items.push(self.parse()?);
            if self.eat(close) {
                return Some(items);
            }
            if !self.eat(",") {
                return None;
            }
        }
    }

    fn fields(&mut self) -> Option<Type> {
        let mut fields: Vec<(SmolStr, Type)> = Vec::new();
        if self.eat("}") {
            return Some(Type::record(fields));
        }
        loop {
            let name = SmolStr::new(self.ident()?);
            if !self.eat(":") {
                return None;
            }
            let ty = self.parse()?;
            if fields.iter().any(|(existing, _)| *existing == name) {
                return None;
            }
            fields.push((name, ty));
            if self.eat("}") {
                return Some(Type::record(fields));
            }
            if !self.eat(",") {
                return None;
            }
        }
    }
}
