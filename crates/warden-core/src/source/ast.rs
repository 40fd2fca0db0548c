//! AST for the logic source format (§6)
//!
//! `Decl p(T1, …).` schema lines, `predicate(term, …).` fact lines, and
//! `head(X,…) :- body1, not body2, X < Y.` rule lines all parse into this
//! small set of node types before stratification and evaluation.

use crate::schema::{ArgType, PredicateCategory};
use crate::term::Term;
use crate::types::Comparison;

/// A parsed schema declaration line. `category` is `Ephemeral` for `Decl
/// ephemeral p(...).` lines and `Persistent` otherwise; `Derived` is never
/// parsed directly — it is assigned later, once stratification finds the
/// predicate is the head of a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclNode {
    pub predicate: String,
    pub arg_types: Vec<ArgType>,
    pub category: PredicateCategory,
    pub line: usize,
}

/// A ground fact line (ready to assert as-is, no variables).
#[derive(Debug, Clone, PartialEq)]
pub struct FactLit {
    pub predicate: String,
    pub args: Vec<Term>,
    pub line: usize,
}

/// One atom in a rule body: either a predicate application (possibly
/// negated) or a built-in comparison between two variables/constants.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyAtom {
    Predicate {
        predicate: String,
        args: Vec<VarOrConst>,
        negated: bool,
    },
    Comparison {
        op: Comparison,
        left: VarOrConst,
        right: VarOrConst,
    },
}

/// A rule-body argument: a capitalized variable name or a ground constant.
#[derive(Debug, Clone, PartialEq)]
pub enum VarOrConst {
    Var(String),
    Const(Term),
}

/// A Horn clause `head(X,…) :- body1, …, bodyN.`
#[derive(Debug, Clone, PartialEq)]
pub struct RuleNode {
    pub head_predicate: String,
    pub head_args: Vec<VarOrConst>,
    pub body: Vec<BodyAtom>,
    pub line: usize,
}

/// A hybrid directive recognized by the loader and desugared before the
/// evaluator ever sees it (§6): `INTENT:`, `PROMPT:`, `TAXONOMY:`.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Intent {
        text: String,
        verb: String,
        target: String,
    },
    Prompt {
        id: String,
        role: String,
        content: String,
    },
    Taxonomy {
        chain: Vec<String>,
    },
}

/// One parsed top-level item of the source text.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Decl(DeclNode),
    Fact(FactLit),
    Rule(RuleNode),
    Directive(Directive),
}

impl Directive {
    /// Desugar into ordinary facts/rules, as §6 specifies for `TAXONOMY`,
    /// and as a best-effort ground fact for `INTENT`/`PROMPT` (the intent
    /// inferencer and prompt parser proper are out of scope; the loader
    /// only needs to keep these from reaching the evaluator as anything
    /// but ordinary facts).
    pub fn desugar(&self) -> Vec<FactLit> {
        match self {
            Directive::Taxonomy { chain } => chain
                .windows(2)
                .map(|pair| FactLit {
                    predicate: "subclass_of".to_string(),
                    args: vec![Term::name(&pair[1]), Term::name(&pair[0])],
                    line: 0,
                })
                .collect(),
            Directive::Intent { verb, target, .. } => vec![FactLit {
                predicate: "user_intent".to_string(),
                args: vec![Term::name(verb), Term::string(target)],
                line: 0,
            }],
            Directive::Prompt { id, role, content } => vec![FactLit {
                predicate: "prompt".to_string(),
                args: vec![Term::name(id), Term::name(role), Term::string(content)],
                line: 0,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_desugar_order() {
        // TAXONOMY: a > b > c  =>  subclass_of(c,b). subclass_of(b,a).
        let d = Directive::Taxonomy {
            chain: vec!["a".into(), "b".into(), "c".into()],
        };
        let facts = d.desugar();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].predicate, "subclass_of");
        assert_eq!(facts[0].args[0], Term::name("b"));
        assert_eq!(facts[0].args[1], Term::name("a"));
        assert_eq!(facts[1].args[0], Term::name("c"));
        assert_eq!(facts[1].args[1], Term::name("b"));
    }
}
