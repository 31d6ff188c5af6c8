//! The subtyping graph over basic type names.

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use std::collections::VecDeque;

/// Name of the top type in the basic-type graph.
pub const ANY: &str = "any";

/// Directed graph of `sub -> super` edges between basic type names.
///
/// Built once per compilation and passed by reference into every
/// comparison; there is no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct TypeGraph {
    edges: FxHashMap<SmolStr, Vec<SmolStr>>,
}

impl TypeGraph {
    /// An empty graph. Only reflexivity and `any` hold.
    pub fn new() -> Self {
        Self::default()
    }

    /// `bool <: int <: float <: any`, `str <: any`, `unit <: any`.
    pub fn with_builtins() -> Self {
        let mut graph = Self::new();
        graph.add_subtype("bool", "int");
        graph.add_subtype("int", "float");
        graph.add_subtype("float", ANY);
        graph.add_subtype("str", ANY);
        graph.add_subtype("unit", ANY);
        graph
    }

    pub fn add_subtype(&mut self, sub: impl Into<SmolStr>, sup: impl Into<SmolStr>) {
        let sub = normalize(sub.into());
        let sup = normalize(sup.into());
        self.edges.entry(sup.clone()).or_default();
        let supers = self.edges.entry(sub).or_default();
        if !supers.contains(&sup) {
            supers.push(sup);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(normalize_str(name))
    }

    /// Direct supertypes of `name`, in registration order.
    pub fn supertypes(&self, name: &str) -> &[SmolStr] {
        self.edges
            .get(normalize_str(name))
            .map_or(&[], |supers| supers.as_slice())
    }

    /// Reachability from `sub` to `sup`.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let sub = normalize_str(sub);
        let sup = normalize_str(sup);
        if sub == sup || sup == ANY {
            return true;
        }

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::from([sub]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for next in self.supertypes(current) {
                if next == sup {
                    return true;
                }
                queue.push_back(next.as_str());
            }
        }
        false
    }
}

fn normalize(name: SmolStr) -> SmolStr {
    if name == "void" {
        SmolStr::new_inline("unit")
    } else {
        name
    }
}

fn normalize_str(name: &str) -> &str {
    if name == "void" {
        "unit"
    } else {
        name
    }
}
