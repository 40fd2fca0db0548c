//! Schema declarations and the Fact-Category Classifier
//!
//! A `Decl predicate(Type, …).` line fixes arity and expected term kind for
//! a predicate. Facts whose predicate is not declared are rejected (I1).
//! Each predicate also carries a category — Persistent, Ephemeral, or
//! Derived — that controls boot hydration and shutdown persistence (§3).

use crate::error::SchemaError;
use crate::term::Term;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Expected kind for a schema argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgType {
    Name,
    String,
    Integer,
    Float,
    Boolean,
    List,
    /// Accepts any Term kind; used for predicates whose arguments are
    /// polymorphic across call sites.
    Any,
}

impl ArgType {
    pub fn accepts(&self, term: &Term) -> bool {
        matches!(
            (self, term),
            (ArgType::Any, _)
                | (ArgType::Name, Term::Name(_))
                | (ArgType::String, Term::String(_))
                | (ArgType::Integer, Term::Integer(_))
                | (ArgType::Float, Term::Float(_))
                | (ArgType::Boolean, Term::Boolean(_))
                | (ArgType::List, Term::List(_))
        )
    }
}

impl std::fmt::Display for ArgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArgType::Name => "Name",
            ArgType::String => "String",
            ArgType::Integer => "Integer",
            ArgType::Float => "Float",
            ArgType::Boolean => "Boolean",
            ArgType::List => "List",
            ArgType::Any => "Any",
        };
        write!(f, "{s}")
    }
}

/// Whether a predicate's facts are loaded/saved from durable storage,
/// session-scoped only, or never stored at all (produced solely by rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateCategory {
    /// Default: loaded from durable storage at boot, saved at shutdown.
    Persistent,
    /// Session-scoped; not loaded from disk; cleared on boot.
    Ephemeral,
    /// Head of at least one rule; never asserted directly, never stored.
    Derived,
}

/// A single `Decl p(T1, …, Tn).` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateDecl {
    pub name: String,
    pub arg_types: Vec<ArgType>,
    pub category: PredicateCategory,
}

impl PredicateDecl {
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }
}

/// The full set of declared predicates, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    decls: HashMap<String, PredicateDecl>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, decl: PredicateDecl) {
        self.decls.insert(decl.name.clone(), decl);
    }

    pub fn get(&self, predicate: &str) -> Option<&PredicateDecl> {
        self.decls.get(predicate)
    }

    pub fn is_declared(&self, predicate: &str) -> bool {
        self.decls.contains_key(predicate)
    }

    pub fn category_of(&self, predicate: &str) -> Option<PredicateCategory> {
        self.decls.get(predicate).map(|d| d.category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PredicateDecl> {
        self.decls.values()
    }

    /// Mark a predicate Derived once stratification determines it is the
    /// head of at least one rule (a predicate may be declared Persistent by
    /// default and later promoted — I2 enforces Derived predicates are
    /// never asserted directly, so the classifier is final before Evaluate).
    pub fn promote_to_derived(&mut self, predicate: &str) {
        if let Some(decl) = self.decls.get_mut(predicate) {
            decl.category = PredicateCategory::Derived;
        }
    }

    /// Validate a fact against its schema: predicate must be declared (I1),
    /// arity must match, and each argument's type must be accepted.
    pub fn validate_fact(
        &self,
        predicate: &str,
        args: &[Term],
    ) -> Result<(), SchemaError> {
        let decl = self
            .decls
            .get(predicate)
            .ok_or_else(|| SchemaError::Unknown(predicate.to_string()))?;

        if decl.arity() != args.len() {
            return Err(SchemaError::ArityMismatch {
                predicate: predicate.to_string(),
                expected: decl.arity(),
                actual: args.len(),
            });
        }

        for (i, (ty, term)) in decl.arg_types.iter().zip(args.iter()).enumerate() {
            if !ty.accepts(term) {
                return Err(SchemaError::TypeMismatch {
                    predicate: predicate.to_string(),
                    position: i,
                    expected: ty.to_string(),
                    actual: term.type_tag().to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, arity: usize) -> PredicateDecl {
        PredicateDecl {
            name: name.to_string(),
            arg_types: vec![ArgType::Any; arity],
            category: PredicateCategory::Persistent,
        }
    }

    #[test]
    fn test_unknown_predicate_rejected() {
        let schema = Schema::new();
        let err = schema.validate_fact("unique", &[Term::name("x")]).unwrap_err();
        assert!(matches!(err, SchemaError::Unknown(_)));
    }

    #[test]
    fn test_arity_mismatch() {
        let mut schema = Schema::new();
        schema.declare(decl("task_status", 2));
        let err = schema
            .validate_fact("task_status", &[Term::name("t1")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::ArityMismatch { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        let mut schema = Schema::new();
        schema.declare(PredicateDecl {
            name: "p".into(),
            arg_types: vec![ArgType::Integer],
            category: PredicateCategory::Persistent,
        });
        let err = schema.validate_fact("p", &[Term::name("x")]).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
    }

    #[test]
    fn test_valid_fact_passes() {
        let mut schema = Schema::new();
        schema.declare(decl("unique", 1));
        assert!(schema.validate_fact("unique", &[Term::name("singleton")]).is_ok());
    }

    #[test]
    fn test_promote_to_derived() {
        let mut schema = Schema::new();
        schema.declare(decl("permitted", 2));
        schema.promote_to_derived("permitted");
        assert_eq!(
            schema.category_of("permitted"),
            Some(PredicateCategory::Derived)
        );
    }
}
