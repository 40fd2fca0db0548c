//! Semi-naive stratified fixpoint evaluator (§4.1 algorithm)
//!
//! A fresh derived-store is seeded with all EDB atoms. Within a stratum the
//! evaluator iterates applying every rule whose head belongs to that
//! stratum until no new facts are produced or the gas cap is hit. External
//! predicates are consulted through the bridge for any goal matching a
//! registered symbol; their output tuples are folded in as ordinary facts
//! for the remainder of evaluation.

use crate::bridge::{ExternalPredicateBridge, Mode};
use crate::error::{KernelError, ProgramError};
use crate::source::{BodyAtom, RuleNode, VarOrConst};
use crate::stratify::Stratification;
use crate::term::{Fact, Term};
use std::collections::{HashMap, HashSet};

/// A partial or complete variable binding built up while joining one rule
/// body left to right.
type Bindings = HashMap<String, Term>;

/// Static mode/safety check (§4.2): every Input-mode position of an
/// external-predicate atom must be bound — by a prior positive ordinary
/// atom, a prior external atom's output, or a ground constant — before
/// that atom is evaluated. This runs once per rule at analysis time,
/// ahead of (and independent from) the fixpoint loop.
pub fn mode_check(rules: &[RuleNode], bridge: &ExternalPredicateBridge) -> Result<(), ProgramError> {
    for rule in rules {
        let mut bound: HashSet<String> = HashSet::new();
        for atom in &rule.body {
            match atom {
                BodyAtom::Predicate {
                    predicate,
                    args,
                    negated,
                } => {
                    if let Some(modes) = bridge.modes_of(predicate) {
                        for (pos, (arg, mode)) in args.iter().zip(modes.iter()).enumerate() {
                            if *mode == Mode::Input {
                                if let VarOrConst::Var(name) = arg {
                                    if !bound.contains(name) {
                                        return Err(ProgramError::Mode {
                                            atom: predicate.clone(),
                                            position: pos,
                                        });
                                    }
                                }
                            }
                        }
                    }
                    if !negated {
                        for arg in args {
                            if let VarOrConst::Var(name) = arg {
                                bound.insert(name.clone());
                            }
                        }
                    }
                }
                BodyAtom::Comparison { .. } => {}
            }
        }
    }
    Ok(())
}

fn instantiate(args: &[VarOrConst], bindings: &Bindings) -> Option<Vec<Term>> {
    args.iter()
        .map(|a| match a {
            VarOrConst::Const(t) => Some(t.clone()),
            VarOrConst::Var(name) => bindings.get(name).cloned(),
        })
        .collect()
}

fn extend_binding(
    args: &[VarOrConst],
    candidate: &[Term],
    base: &Bindings,
) -> Option<Bindings> {
    if args.len() != candidate.len() {
        return None;
    }
    let mut next = base.clone();
    for (arg, value) in args.iter().zip(candidate.iter()) {
        match arg {
            VarOrConst::Const(c) => {
                if c != value {
                    return None;
                }
            }
            VarOrConst::Var(name) => {
                if let Some(existing) = next.get(name) {
                    if existing != value {
                        return None;
                    }
                } else {
                    next.insert(name.clone(), value.clone());
                }
            }
        }
    }
    Some(next)
}

/// The live fact universe during one evaluation cycle: predicate -> set of
/// fact tuples (args only; predicate name is the map key).
#[derive(Default)]
struct FactTable(HashMap<String, HashSet<Vec<Term>>>);

impl FactTable {
    fn rows_of(&self, predicate: &str) -> Vec<Vec<Term>> {
        self.0
            .get(predicate)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn insert(&mut self, predicate: &str, row: Vec<Term>) -> bool {
        self.0.entry(predicate.to_string()).or_default().insert(row)
    }

    fn total_len(&self) -> usize {
        self.0.values().map(|s| s.len()).sum()
    }
}

fn join_body(
    body: &[BodyAtom],
    facts: &FactTable,
    bridge: &ExternalPredicateBridge,
) -> Vec<Bindings> {
    let mut frontier = vec![Bindings::new()];

    for atom in body {
        let mut next = Vec::new();
        match atom {
            BodyAtom::Predicate {
                predicate,
                args,
                negated,
            } => {
                if *negated {
                    if bridge.is_registered(predicate) {
                        let modes = bridge.modes_of(predicate).unwrap_or_default();
                        for binding in frontier {
                            let inputs: Option<Vec<Term>> = args
                                .iter()
                                .zip(modes.iter())
                                .filter(|(_, m)| **m == Mode::Input)
                                .map(|(a, _)| match a {
                                    VarOrConst::Const(t) => Some(t.clone()),
                                    VarOrConst::Var(name) => binding.get(name).cloned(),
                                })
                                .collect();
                            let blocked = match inputs {
                                Some(inputs) => !bridge.resolve(predicate, &inputs).is_empty(),
                                None => false,
                            };
                            if !blocked {
                                next.push(binding);
                            }
                        }
                    } else {
                        for binding in frontier {
                            let blocked = match instantiate(args, &binding) {
                                Some(ground) => facts.rows_of(predicate).contains(&ground),
                                None => false,
                            };
                            if !blocked {
                                next.push(binding);
                            }
                        }
                    }
                } else if bridge.is_registered(predicate) {
                    let modes = bridge.modes_of(predicate).unwrap_or_default();
                    for binding in frontier {
                        let inputs: Vec<Term> = args
                            .iter()
                            .zip(modes.iter())
                            .filter(|(_, m)| **m == Mode::Input)
                            .filter_map(|(a, _)| match a {
                                VarOrConst::Const(t) => Some(t.clone()),
                                VarOrConst::Var(name) => binding.get(name).cloned(),
                            })
                            .collect();
                        for row in bridge.resolve(predicate, &inputs) {
                            if let Some(extended) = extend_binding(args, &row, &binding) {
                                next.push(extended);
                            }
                        }
                    }
                } else {
                    let rows = facts.rows_of(predicate);
                    for binding in frontier {
                        for row in &rows {
                            if let Some(extended) = extend_binding(args, row, &binding) {
                                next.push(extended);
                            }
                        }
                    }
                }
            }
            BodyAtom::Comparison { op, left, right } => {
                for binding in frontier {
                    let resolve = |v: &VarOrConst, b: &Bindings| -> Option<Term> {
                        match v {
                            VarOrConst::Const(t) => Some(t.clone()),
                            VarOrConst::Var(n) => b.get(n).cloned(),
                        }
                    };
                    let ok = match (resolve(left, &binding), resolve(right, &binding)) {
                        (Some(l), Some(r)) => match (l.as_f64(), r.as_f64()) {
                            (Some(lf), Some(rf)) => op.evaluate(lf, rf),
                            _ => l == r && matches!(op, crate::types::Comparison::Equal),
                        },
                        _ => false,
                    };
                    if ok {
                        next.push(binding);
                    }
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    frontier
}

/// Result of one successful `Evaluate()` call.
pub struct EvaluationResult {
    pub derived: Vec<Fact>,
    pub total_facts: usize,
}

/// Run the full stratified fixpoint over `edb` using `rules`, grouped by
/// `strata`, consulting `bridge` for external predicates. Returns every
/// fact (EDB re-echoed plus all IDB derivations) once fixpoint is reached,
/// or `GasExceeded` if the cap is hit first.
pub fn evaluate(
    edb: &[Fact],
    rules: &[RuleNode],
    strata: &Stratification,
    bridge: &ExternalPredicateBridge,
    gas_cap: usize,
) -> Result<EvaluationResult, KernelError> {
    bridge.begin_cycle();

    let mut facts = FactTable::default();
    for fact in edb {
        facts.insert(&fact.predicate, fact.args.clone());
    }

    let mut rules_by_stratum: Vec<Vec<&RuleNode>> = vec![Vec::new(); strata.stratum_count().max(1)];
    for rule in rules {
        let s = strata.stratum_of(&rule.head_predicate);
        if s >= rules_by_stratum.len() {
            rules_by_stratum.resize_with(s + 1, Vec::new);
        }
        rules_by_stratum[s].push(rule);
    }

    for stratum_rules in &rules_by_stratum {
        loop {
            let mut changed = false;
            for rule in stratum_rules {
                let bindings = join_body(&rule.body, &facts, bridge);
                for binding in bindings {
                    if let Some(head_row) = instantiate(&rule.head_args, &binding) {
                        if facts.insert(&rule.head_predicate, head_row) {
                            changed = true;
                            if facts.total_len() > gas_cap {
                                return Err(KernelError::GasExceeded { limit: gas_cap });
                            }
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    let mut derived = Vec::new();
    for (predicate, rows) in facts.0 {
        for row in rows {
            derived.push(Fact::new(predicate.clone(), row));
        }
    }
    let total_facts = derived.len();

    Ok(EvaluationResult {
        derived,
        total_facts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::FnHandler;
    use crate::source::parse_source;
    use crate::source::Item;
    use crate::stratify::stratify;
    use std::sync::Arc;

    fn rules_from(src: &str) -> Vec<RuleNode> {
        parse_source(src)
            .unwrap()
            .into_iter()
            .filter_map(|i| match i {
                Item::Rule(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_simple_positive_derivation() {
        let edb = vec![Fact::new("edge", vec![Term::name("a"), Term::name("b")])];
        let rules = rules_from("reachable(X,Y) :- edge(X,Y).");
        let strata = stratify(&rules).unwrap();
        let bridge = ExternalPredicateBridge::new();
        let result = evaluate(&edb, &rules, &strata, &bridge, 500_000).unwrap();
        assert!(result
            .derived
            .iter()
            .any(|f| f.predicate == "reachable"));
    }

    #[test]
    fn test_transitive_closure() {
        let edb = vec![
            Fact::new("edge", vec![Term::name("a"), Term::name("b")]),
            Fact::new("edge", vec![Term::name("b"), Term::name("c")]),
        ];
        let rules = rules_from(
            "reachable(X,Y) :- edge(X,Y).\nreachable(X,Y) :- edge(X,Z), reachable(Z,Y).",
        );
        let strata = stratify(&rules).unwrap();
        let bridge = ExternalPredicateBridge::new();
        let result = evaluate(&edb, &rules, &strata, &bridge, 500_000).unwrap();
        let reachable: Vec<_> = result
            .derived
            .iter()
            .filter(|f| f.predicate == "reachable")
            .collect();
        assert_eq!(reachable.len(), 3); // a-b, b-c, a-c
    }

    #[test]
    fn test_negation_excludes_match() {
        let edb = vec![
            Fact::new("declared", vec![Term::name("x")]),
            Fact::new("blocked_item", vec![Term::name("x")]),
        ];
        let rules = rules_from("permitted(X) :- declared(X), not blocked_item(X).");
        let strata = stratify(&rules).unwrap();
        let bridge = ExternalPredicateBridge::new();
        let result = evaluate(&edb, &rules, &strata, &bridge, 500_000).unwrap();
        assert!(!result.derived.iter().any(|f| f.predicate == "permitted"));
    }

    #[test]
    fn test_gas_cap_aborts() {
        // Build an artificially explosive rule set via chained positive edges.
        let mut edb = Vec::new();
        for i in 0..50 {
            edb.push(Fact::new(
                "edge",
                vec![Term::Integer(i), Term::Integer(i + 1)],
            ));
        }
        let rules = rules_from(
            "reachable(X,Y) :- edge(X,Y).\nreachable(X,Y) :- edge(X,Z), reachable(Z,Y).",
        );
        let strata = stratify(&rules).unwrap();
        let bridge = ExternalPredicateBridge::new();
        let err = evaluate(&edb, &rules, &strata, &bridge, 10).unwrap_err();
        assert!(matches!(err, KernelError::GasExceeded { limit: 10 }));
    }

    #[test]
    fn test_external_predicate_s6() {
        let bridge = ExternalPredicateBridge::new();
        bridge.register(
            "query_session",
            vec![Mode::Input, Mode::Output, Mode::Output],
            Arc::new(FnHandler(|inputs| {
                Ok(vec![vec![inputs[0].clone(), Term::string("x"), Term::string("y")]])
            })),
        );

        let edb = vec![Fact::new(
            "session_id",
            vec![Term::string("s1"), Term::name("s")],
        )];
        let rules = rules_from(
            "ok(S,X,Y) :- session_id(\"s1\", S), query_session(S, X, Y).",
        );
        mode_check(&rules, &bridge).unwrap();
        let strata = stratify(&rules).unwrap();
        let result = evaluate(&edb, &rules, &strata, &bridge, 500_000).unwrap();
        assert!(result.derived.iter().any(|f| f.predicate == "ok"));
    }

    #[test]
    fn test_negated_external_predicate_only_passes_input_positions() {
        // query_session/3 is (Input, Output, Output); the Output positions
        // (X, Y) are unbound at the point `not query_session(S, X, Y)` is
        // evaluated, so a negated call must resolve on S alone rather than
        // instantiating the whole atom (which would fail to ground and
        // silently never block).
        let bridge = ExternalPredicateBridge::new();
        bridge.register(
            "query_session",
            vec![Mode::Input, Mode::Output, Mode::Output],
            Arc::new(FnHandler(|inputs| {
                if inputs[0] == Term::string("s1") {
                    Ok(vec![vec![Term::string("x"), Term::string("y")]])
                } else {
                    Ok(vec![])
                }
            })),
        );

        let edb = vec![Fact::new(
            "session_id",
            vec![Term::string("s1"), Term::name("s")],
        )];
        let rules = rules_from(
            "orphaned(S) :- session_id(\"s1\", S), not query_session(S, X, Y).",
        );
        let strata = stratify(&rules).unwrap();
        let result = evaluate(&edb, &rules, &strata, &bridge, 500_000).unwrap();
        assert!(!result.derived.iter().any(|f| f.predicate == "orphaned"));
    }

    #[test]
    fn test_mode_check_rejects_unbound_input() {
        let bridge = ExternalPredicateBridge::new();
        bridge.register(
            "query_session",
            vec![Mode::Input, Mode::Output, Mode::Output],
            Arc::new(FnHandler(|_| Ok(vec![]))),
        );
        let rules = rules_from("bad(S,X,Y) :- query_session(S, X, Y).");
        let err = mode_check(&rules, &bridge).unwrap_err();
        assert!(matches!(err, ProgramError::Mode { .. }));
    }
}
