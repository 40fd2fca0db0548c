//! Term and Fact model
//!
//! `Term` is the tagged-sum value type over the closed universe §3 defines:
//! Name, String, Integer, Float, Boolean, and List-of-constants. `Fact` pairs
//! a predicate identifier with an ordered sequence of Terms. Names and
//! Strings occupy disjoint domains even when the spelling matches (I2 relies
//! on this tag distinction), and equality/hashing are structural throughout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single value in the closed term universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    /// An identifier prefixed by `/` in source text, e.g. `/completed`.
    Name(String),
    /// A quoted string literal.
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// A finite list of constant terms (no nested lists).
    List(Vec<Term>),
}

impl Eq for Term {}

impl std::hash::Hash for Term {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl Term {
    /// `/name` constructor convenience.
    pub fn name(s: impl Into<String>) -> Self {
        Term::Name(s.into())
    }

    /// `"string"` constructor convenience.
    pub fn string(s: impl Into<String>) -> Self {
        Term::String(s.into())
    }

    pub fn float(f: f64) -> Self {
        Term::Float(f)
    }

    /// A short tag distinguishing Term variants for error messages and
    /// schema type-checking (`Name`, `String`, `Integer`, `Float`,
    /// `Boolean`, `List`).
    pub fn type_tag(&self) -> &'static str {
        match self {
            Term::Name(_) => "Name",
            Term::String(_) => "String",
            Term::Integer(_) => "Integer",
            Term::Float(_) => "Float",
            Term::Boolean(_) => "Boolean",
            Term::List(_) => "List",
        }
    }

    /// Widen Integer/Float to f64 for use with built-in comparisons;
    /// returns `None` for non-numeric or non-ground terms.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Term::Integer(i) => Some(*i as f64),
            Term::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Canonical string form used to build the fact fingerprint. Tags
    /// distinguish Name from String so `/x` and `"x"` never collide.
    pub fn canonical(&self) -> String {
        match self {
            Term::Name(n) => format!("N:{n}"),
            Term::String(s) => format!("S:{s}"),
            Term::Integer(i) => format!("I:{i}"),
            Term::Float(f) => format!("F:{}", f.to_bits()),
            Term::Boolean(b) => format!("B:{b}"),
            Term::List(items) => {
                let inner: Vec<String> = items.iter().map(Term::canonical).collect();
                format!("L:[{}]", inner.join(","))
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Name(n) => write!(f, "/{n}"),
            Term::String(s) => write!(f, "\"{s}\""),
            Term::Integer(i) => write!(f, "{i}"),
            Term::Float(n) => write!(f, "{n}"),
            Term::Boolean(b) => write!(f, "/{}", if *b { "true" } else { "false" }),
            Term::List(items) => {
                let inner: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                write!(f, "[{}]", inner.join(", "))
            }
        }
    }
}

/// An immutable tuple `(predicate, args)`. Two facts are equal iff predicate
/// and args are componentwise equal (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    pub args: Vec<Term>,
}

impl Fact {
    pub fn new(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Deterministic dedup key: predicate name concatenated with each arg's
    /// canonical, tag-qualified serialization (the "Fingerprint/canonical
    /// key" of the glossary). `Assert` uses this for idempotence (I3, I7).
    pub fn fingerprint(&self) -> String {
        let mut out = self.predicate.clone();
        out.push('(');
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&arg.canonical());
        }
        out.push(')');
        out
    }

    /// Match used by `RetractFact` when a single argument is supplied:
    /// predicate and first argument equal.
    pub fn matches_predicate_and_first_arg(&self, predicate: &str, first: &Term) -> bool {
        self.predicate == predicate && self.args.first() == Some(first)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner: Vec<String> = self.args.iter().map(|t| t.to_string()).collect();
        write!(f, "{}({})", self.predicate, inner.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_string_distinct_fingerprint() {
        let a = Fact::new("p", vec![Term::name("x")]);
        let b = Fact::new("p", vec![Term::string("x")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fact::new("task_status", vec![Term::name("t1"), Term::name("completed")]);
        let b = Fact::new("task_status", vec![Term::name("t1"), Term::name("completed")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_componentwise_equality() {
        let a = Fact::new("p", vec![Term::Integer(1)]);
        let b = Fact::new("p", vec![Term::Integer(1)]);
        let c = Fact::new("p", vec![Term::Integer(2)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_first_arg_match() {
        let f = Fact::new("task_status", vec![Term::name("t1"), Term::name("failed")]);
        assert!(f.matches_predicate_and_first_arg("task_status", &Term::name("t1")));
        assert!(!f.matches_predicate_and_first_arg("task_status", &Term::name("t2")));
    }

    #[test]
    fn test_display() {
        let f = Fact::new("unique", vec![Term::name("singleton")]);
        assert_eq!(f.to_string(), "unique(/singleton)");
    }
}
