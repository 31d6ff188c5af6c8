//! Scoped variable environment.

use pllm_ast::{SmolStr, Type};
use rustc_hash::FxHashMap;

pub type Scope = FxHashMap<SmolStr, Type>;

/// A stack of scopes, searched innermost first.
///
/// The bottom scope is never popped, so `define` always has somewhere to
/// write.
#[derive(Debug, Clone)]
pub struct TypeEnvironment {
    scopes: Vec<Scope>,
}

impl Default for TypeEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeEnvironment {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// Binds `name` in the innermost scope, replacing any binding there.
    pub fn define(&mut self, name: impl Into<SmolStr>, ty: Type) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), ty);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pops the innermost scope and returns its bindings. The root scope stays.
    pub fn exit_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Runs `f` inside a fresh child scope.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.enter_scope();
        let result = f(self);
        self.exit_scope();
        result
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Every visible name, innermost scope first; shadowed names repeat.
    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.scopes.iter().rev().flat_map(|scope| scope.keys())
    }
}
