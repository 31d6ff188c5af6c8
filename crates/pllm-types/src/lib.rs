//! PLLM Type System
//!
//! A structural type lattice with a gradual top type:
//!
//! - `Any` is a supertype of every type and a subtype only of itself;
//! - basic types relate through a [`TypeGraph`] of named edges
//!   (`bool <: int <: float <: any`, `str <: any`, `unit <: any`);
//! - lists are covariant, records use width/depth subtyping, unions are
//!   compared member-wise, functions are contravariant in parameters and
//!   covariant in returns, and aliases are transparent.
//!
//! Two relations are offered on top of subtyping: [`Type::is_equivalent`]
//! (subtype both ways) and [`Type::compatible`], the gradual relation used by
//! the checker where `Any` on either side always succeeds.

pub mod graph;
pub mod parse;

pub use graph::{TypeGraph, ANY};
pub use parse::{builtin, parse_type, TypeParseError};

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt;

/// Type aliases visible at a point in the program, by name.
pub type Aliases = FxHashMap<SmolStr, Type>;

/// A PLLM type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Type {
    /// Gradual top type
    #[default]
    Any,
    /// A node of the [`TypeGraph`]: `int`, `float`, `str`, `bool`, `unit`, ...
    Basic(SmolStr),
    List(Box<Type>),
    /// Fields are kept sorted by name
    Record(BTreeMap<SmolStr, Type>),
    /// Members are kept sorted and deduplicated
    Union(Vec<Type>),
    Function { params: Vec<Type>, returns: Vec<Type> },
    Alias { name: SmolStr, target: Box<Type> },
}

impl Type {
    /// A basic type by name; `any` maps to [`Type::Any`], `void` to `unit`.
    pub fn basic(name: &str) -> Type {
        match name {
            ANY => Type::Any,
            "void" => Type::Basic(SmolStr::new_inline("unit")),
            _ => Type::Basic(SmolStr::new(name)),
        }
    }

    pub fn int() -> Type {
        Type::basic("int")
    }

    pub fn float() -> Type {
        Type::basic("float")
    }

    pub fn str() -> Type {
        Type::basic("str")
    }

    pub fn bool() -> Type {
        Type::basic("bool")
    }

    pub fn unit() -> Type {
        Type::basic("unit")
    }

    pub fn list(element: Type) -> Type {
        Type::List(Box::new(element))
    }

    /// Later duplicates of a field name replace earlier ones.
    pub fn record<K: Into<SmolStr>>(fields: impl IntoIterator<Item = (K, Type)>) -> Type {
        Type::Record(
            fields
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        )
    }

    /// A record with positional fields `_0`, `_1`, ...
    pub fn tuple(items: impl IntoIterator<Item = Type>) -> Type {
        Type::record(
            items
                .into_iter()
                .enumerate()
                .map(|(idx, ty)| (format!("_{idx}"), ty)),
        )
    }

    /// Flattens nested unions; a single remaining member stands for itself.
    pub fn union(members: impl IntoIterator<Item = Type>) -> Type {
        let mut flat = Vec::new();
        for member in members {
            match member {
                Type::Union(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        flat.sort();
        flat.dedup();
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Type::Union(flat)
        }
    }

    pub fn function(params: Vec<Type>, returns: Vec<Type>) -> Type {
        Type::Function { params, returns }
    }

    pub fn alias(name: impl Into<SmolStr>, target: Type) -> Type {
        Type::Alias {
            name: name.into(),
            target: Box::new(target),
        }
    }

    /// The value a call produces for a function returning `returns`:
    /// `unit` for none, the type itself for one, a positional record otherwise.
    pub fn returns_as_value(returns: &[Type]) -> Type {
        match returns {
            [] => Type::unit(),
            [single] => single.clone(),
            many => Type::tuple(many.iter().cloned()),
        }
    }

    /// Strips any number of alias layers.
    pub fn resolved(&self) -> &Type {
        let mut ty = self;
        while let Type::Alias { target, .. } = ty {
            ty = target;
        }
        ty
    }

    pub fn is_any(&self) -> bool {
        matches!(self.resolved(), Type::Any)
    }

    pub fn is_basic(&self, name: &str) -> bool {
        matches!(self.resolved(), Type::Basic(n) if n == name)
    }

    /// `A <: B` in the strict lattice.
    pub fn is_subtype_of(&self, other: &Type, graph: &TypeGraph) -> bool {
        match (self, other) {
            (_, Type::Any) => true,
            (Type::Alias { target, .. }, _) => target.is_subtype_of(other, graph),
            (_, Type::Alias { target, .. }) => self.is_subtype_of(target, graph),
            (Type::Union(members), _) => members.iter().all(|m| m.is_subtype_of(other, graph)),
            (_, Type::Union(members)) => members.iter().any(|m| self.is_subtype_of(m, graph)),
            (Type::Any, _) => false,
            (Type::Basic(a), Type::Basic(b)) => graph.is_subtype(a, b),
            (Type::List(a), Type::List(b)) => a.is_subtype_of(b, graph),
            (Type::Record(sub), Type::Record(sup)) => sup.iter().all(|(name, required)| {
                sub.get(name)
                    .is_some_and(|field| field.is_subtype_of(required, graph))
            }),
            (
                Type::Function {
                    params: p1,
                    returns: r1,
                },
                Type::Function {
                    params: p2,
                    returns: r2,
                },
            ) => {
                p1.len() == p2.len()
                    && r1.len() == r2.len()
                    && p1.iter().zip(p2).all(|(a, b)| b.is_subtype_of(a, graph))
                    && r1.iter().zip(r2).all(|(a, b)| a.is_subtype_of(b, graph))
            }
            _ => false,
        }
    }

    /// Subtype in both directions.
    pub fn is_equivalent(&self, other: &Type, graph: &TypeGraph) -> bool {
        self.is_subtype_of(other, graph) && other.is_subtype_of(self, graph)
    }

    /// Gradual compatibility: subtyping where `Any` at any depth matches
    /// in both directions, so `list[any]` fits `list[str]` and vice versa.
    pub fn compatible(&self, target: &Type, graph: &TypeGraph) -> bool {
        match (self, target) {
            (Type::Any, _) | (_, Type::Any) => true,
            (Type::Alias { target: inner, .. }, _) => inner.compatible(target, graph),
            (_, Type::Alias { target: inner, .. }) => self.compatible(inner, graph),
            (Type::Union(members), _) => members.iter().all(|m| m.compatible(target, graph)),
            (_, Type::Union(members)) => members.iter().any(|m| self.compatible(m, graph)),
            (Type::List(a), Type::List(b)) => a.compatible(b, graph),
            (Type::Record(sub), Type::Record(sup)) => sup.iter().all(|(name, required)| {
                sub.get(name)
                    .is_some_and(|field| field.compatible(required, graph))
            }),
            (
                Type::Function {
                    params: p1,
                    returns: r1,
                },
                Type::Function {
                    params: p2,
                    returns: r2,
                },
            ) => {
                p1.len() == p2.len()
                    && r1.len() == r2.len()
                    && p1.iter().zip(p2).all(|(a, b)| b.compatible(a, graph))
                    && r1.iter().zip(r2).all(|(a, b)| a.compatible(b, graph))
            }
            _ => self.is_subtype_of(target, graph),
        }
    }

    /// `int`, `float` and their subtypes (which includes `bool`).
    pub fn is_numeric(&self, graph: &TypeGraph) -> bool {
        !self.is_any() && self.is_subtype_of(&Type::float(), graph)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Type]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "{ANY}"),
            Type::Basic(name) => write!(f, "{name}"),
            Type::List(element) => write!(f, "list[{element}]"),
            Type::Record(fields) => {
                write!(f, "record{{")?;
                for (idx, (name, ty)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            Type::Union(members) => {
                write!(f, "union[")?;
                write_list(f, members)?;
                write!(f, "]")
            }
            Type::Function { params, returns } => {
                write!(f, "(")?;
                write_list(f, params)?;
                write!(f, ")->(")?;
                write_list(f, returns)?;
                write!(f, ")")
            }
            Type::Alias { name, .. } => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph() -> TypeGraph {
        TypeGraph::with_builtins()
    }

    #[test]
    fn test_any_is_top_only() {
        let g = graph();
        assert!(Type::int().is_subtype_of(&Type::Any, &g));
        assert!(Type::list(Type::str()).is_subtype_of(&Type::Any, &g));
        assert!(Type::Any.is_subtype_of(&Type::Any, &g));
        assert!(!Type::Any.is_subtype_of(&Type::int(), &g));
    }

    #[test]
    fn test_any_is_compatible_both_ways() {
        let g = graph();
        assert!(Type::Any.compatible(&Type::int(), &g));
        assert!(Type::int().compatible(&Type::Any, &g));
        assert!(!Type::str().compatible(&Type::int(), &g));
    }

    #[test]
    fn test_nested_any_is_compatible() {
        let g = graph();
        let loose = Type::list(Type::Any);
        assert!(loose.compatible(&Type::list(Type::str()), &g));
        assert!(Type::list(Type::str()).compatible(&loose, &g));
        assert!(!loose.is_subtype_of(&Type::list(Type::str()), &g));

        let partial = Type::record([("a", Type::Any), ("b", Type::str())]);
        assert!(partial.compatible(&Type::record([("a", Type::int())]), &g));
        assert!(!partial.compatible(&Type::record([("b", Type::int())]), &g));
        assert!(!partial.compatible(&Type::record([("c", Type::int())]), &g));

        let callback = Type::function(vec![Type::Any], vec![Type::int()]);
        assert!(callback.compatible(&Type::function(vec![Type::str()], vec![Type::float()]), &g));
        assert!(!Type::list(Type::Any).compatible(&Type::int(), &g));
    }

    #[test]
    fn test_list_covariance() {
        let g = graph();
        assert!(Type::list(Type::int()).is_subtype_of(&Type::list(Type::float()), &g));
        assert!(!Type::list(Type::float()).is_subtype_of(&Type::list(Type::int()), &g));
        assert!(!Type::list(Type::int()).is_subtype_of(&Type::int(), &g));
    }

    #[test]
    fn test_record_depth_subtyping() {
        let g = graph();
        let sub = Type::record([("score", Type::int())]);
        let sup = Type::record([("score", Type::float())]);
        assert!(sub.is_subtype_of(&sup, &g));
        assert!(!sup.is_subtype_of(&sub, &g));
    }

    #[test]
    fn test_record_field_order_is_irrelevant() {
        let a = Type::record([("a", Type::int()), ("b", Type::str())]);
        let b = Type::record([("b", Type::str()), ("a", Type::int())]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_union_rules() {
        let g = graph();
        let int_or_str = Type::union([Type::int(), Type::str()]);
        assert!(Type::int().is_subtype_of(&int_or_str, &g));
        assert!(Type::bool().is_subtype_of(&int_or_str, &g));
        assert!(!Type::float().is_subtype_of(&int_or_str, &g));

        let bool_or_str = Type::union([Type::bool(), Type::str()]);
        assert!(bool_or_str.is_subtype_of(&int_or_str, &g));
        assert!(!int_or_str.is_subtype_of(&bool_or_str, &g));
        assert!(!int_or_str.is_subtype_of(&Type::int(), &g));
    }

    #[test]
    fn test_union_is_canonical() {
        let nested = Type::union([Type::str(), Type::union([Type::int(), Type::str()])]);
        assert_eq!(nested, Type::Union(vec![Type::int(), Type::str()]));
        assert_eq!(Type::union([Type::int(), Type::int()]), Type::int());
    }

    #[test]
    fn test_function_variance() {
        let g = graph();
        let takes_float = Type::function(vec![Type::float()], vec![Type::int()]);
        let takes_int = Type::function(vec![Type::int()], vec![Type::float()]);
        assert!(takes_float.is_subtype_of(&takes_int, &g));
        assert!(!takes_int.is_subtype_of(&takes_float, &g));

        let binary = Type::function(vec![Type::int(), Type::int()], vec![Type::int()]);
        assert!(!binary.is_subtype_of(&takes_int, &g));
    }

    #[test]
    fn test_alias_is_transparent() {
        let g = graph();
        let score = Type::alias("Score", Type::int());
        assert!(score.is_subtype_of(&Type::float(), &g));
        assert!(Type::bool().is_subtype_of(&score, &g));
        assert!(score.is_equivalent(&Type::int(), &g));
        assert!(Type::alias("Loose", Type::Any).is_any());
    }

    #[test]
    fn test_returns_as_value() {
        assert_eq!(Type::returns_as_value(&[]), Type::unit());
        assert_eq!(Type::returns_as_value(&[Type::str()]), Type::str());
        assert_eq!(
            Type::returns_as_value(&[Type::int(), Type::str()]),
            Type::record([("_0", Type::int()), ("_1", Type::str())])
        );
    }

    #[test]
    fn test_numeric() {
        let g = graph();
        assert!(Type::int().is_numeric(&g));
        assert!(Type::bool().is_numeric(&g));
        assert!(!Type::str().is_numeric(&g));
        assert!(!Type::Any.is_numeric(&g));
    }

    #[test]
    fn test_display() {
        let ty = Type::function(
            vec![Type::list(Type::str())],
            vec![Type::record([("ok", Type::bool())]), Type::Any],
        );
        insta::assert_snapshot!(ty.to_string(), @"(list[str])->(record{ok: bool}, any)");
    }
}
