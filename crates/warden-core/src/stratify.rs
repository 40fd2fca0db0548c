//! Stratification of rules by predicate dependency
//!
//! Builds the predicate-dependency graph (an edge `body -> head` for every
//! atom used in a rule body, tagged with whether the reference is negated)
//! and computes a stratum number per predicate via Tarjan SCC plus
//! topological order over the condensation — the same cycle-detection and
//! topological-sort approach a dependency-graph scheduler uses, generalized
//! from goal dependencies to predicate dependencies. Any strongly connected
//! component that contains a negated edge is a stratification violation
//! (recursion through negation, forbidden by §3).

use crate::error::ProgramError;
use crate::source::{BodyAtom, RuleNode};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Maps each predicate name to the stratum it must be evaluated in. Lower
/// strata are evaluated first; a predicate may only negate predicates in a
/// strictly lower stratum.
#[derive(Debug, Clone, Default)]
pub struct Stratification {
    strata: HashMap<String, usize>,
    stratum_count: usize,
}

impl Stratification {
    pub fn stratum_of(&self, predicate: &str) -> usize {
        self.strata.get(predicate).copied().unwrap_or(0)
    }

    pub fn stratum_count(&self) -> usize {
        self.stratum_count
    }

    /// Predicates in ascending stratum order, grouped.
    pub fn ordered_strata(&self) -> Vec<Vec<String>> {
        let mut groups = vec![Vec::new(); self.stratum_count];
        for (pred, stratum) in &self.strata {
            groups[*stratum].push(pred.clone());
        }
        groups
    }
}

/// Compute stratification for a rule set. Predicates that never appear as a
/// rule head (pure EDB or external predicates) still get an entry at
/// stratum 0 if referenced, so callers can look up any predicate safely.
pub fn stratify(rules: &[RuleNode]) -> Result<Stratification, ProgramError> {
    let mut graph: DiGraph<String, bool> = DiGraph::new();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();

    let mut node_for = |graph: &mut DiGraph<String, bool>,
                         index_of: &mut HashMap<String, NodeIndex>,
                         name: &str| {
        *index_of
            .entry(name.to_string())
            .or_insert_with(|| graph.add_node(name.to_string()))
    };

    for rule in rules {
        let head_idx = node_for(&mut graph, &mut index_of, &rule.head_predicate);
        for atom in &rule.body {
            if let BodyAtom::Predicate {
                predicate,
                negated,
                ..
            } = atom
            {
                let body_idx = node_for(&mut graph, &mut index_of, predicate);
                graph.add_edge(body_idx, head_idx, *negated);
            }
        }
    }

    let sccs = tarjan_scc(&graph);

    // Reject any SCC containing a negated edge between two of its members.
    let mut scc_of: HashMap<NodeIndex, usize> = HashMap::new();
    for (scc_id, members) in sccs.iter().enumerate() {
        for &node in members {
            scc_of.insert(node, scc_id);
        }
    }

    for edge in graph.edge_indices() {
        let (src, dst) = graph.edge_endpoints(edge).expect("edge index is valid");
        let negated = *graph.edge_weight(edge).expect("edge weight is valid");
        if negated && scc_of.get(&src) == scc_of.get(&dst) {
            let pred_name = graph[dst].clone();
            return Err(ProgramError::Stratification(pred_name));
        }
    }

    // Condense into a DAG of SCCs and topologically sort it.
    let mut condensation: DiGraph<usize, ()> = DiGraph::new();
    let mut scc_node: HashMap<usize, NodeIndex> = HashMap::new();
    for scc_id in 0..sccs.len() {
        scc_node.insert(scc_id, condensation.add_node(scc_id));
    }
    for edge in graph.edge_indices() {
        let (src, dst) = graph.edge_endpoints(edge).expect("edge index is valid");
        let src_scc = scc_of[&src];
        let dst_scc = scc_of[&dst];
        if src_scc != dst_scc {
            let a = scc_node[&src_scc];
            let b = scc_node[&dst_scc];
            if condensation.find_edge(a, b).is_none() {
                condensation.add_edge(a, b, ());
            }
        }
    }

    let order = toposort(&condensation, None).map_err(|cycle| {
        let scc_id = condensation[cycle.node_id()];
        let any_pred = sccs[scc_id]
            .first()
            .map(|n| graph[*n].clone())
            .unwrap_or_default();
        ProgramError::Stratification(any_pred)
    })?;

    let mut stratum_rank: HashMap<usize, usize> = HashMap::new();
    for (rank, node) in order.iter().enumerate() {
        let scc_id = condensation[*node];
        stratum_rank.insert(scc_id, rank);
    }

    let mut strata = HashMap::new();
    for (node, name) in graph.node_indices().zip(graph.node_weights()) {
        let scc_id = scc_of[&node];
        let rank = stratum_rank[&scc_id];
        strata.insert(name.clone(), rank);
    }

    Ok(Stratification {
        stratum_count: order.len().max(1),
        strata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VarOrConst;

    fn pred_atom(name: &str, negated: bool) -> BodyAtom {
        BodyAtom::Predicate {
            predicate: name.to_string(),
            args: vec![VarOrConst::Var("X".to_string())],
            negated,
        }
    }

    fn rule(head: &str, body: Vec<BodyAtom>) -> RuleNode {
        RuleNode {
            head_predicate: head.to_string(),
            head_args: vec![VarOrConst::Var("X".to_string())],
            body,
            line: 1,
        }
    }

    #[test]
    fn test_simple_linear_stratification() {
        let rules = vec![
            rule("blocked", vec![pred_atom("permitted", true)]),
            rule("permitted", vec![pred_atom("declared", false)]),
        ];
        let strat = stratify(&rules).unwrap();
        assert!(strat.stratum_of("declared") < strat.stratum_of("permitted"));
        assert!(strat.stratum_of("permitted") < strat.stratum_of("blocked"));
    }

    #[test]
    fn test_negation_cycle_rejected() {
        let rules = vec![
            rule("a", vec![pred_atom("b", true)]),
            rule("b", vec![pred_atom("a", false)]),
        ];
        let err = stratify(&rules).unwrap_err();
        assert!(matches!(err, ProgramError::Stratification(_)));
    }

    #[test]
    fn test_positive_recursion_allowed_same_stratum() {
        // reachable(X,Y) :- edge(X,Y). reachable(X,Y) :- edge(X,Z), reachable(Z,Y).
        let rules = vec![
            rule("reachable", vec![pred_atom("edge", false)]),
            rule(
                "reachable",
                vec![pred_atom("edge", false), pred_atom("reachable", false)],
            ),
        ];
        let strat = stratify(&rules).unwrap();
        // positive self-recursion is fine; no error raised
        assert!(strat.stratum_of("reachable") >= strat.stratum_of("edge"));
    }
}
