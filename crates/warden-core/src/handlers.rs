//! Default in-process handlers for the enumerated external predicates (§4.2).
//!
//! `bridge.rs` only provides the registration/memoization mechanism; this
//! module supplies the concrete default handlers for every symbol §4.2
//! enumerates. A HashMap behind an `Arc<RwLock<_>>` serves several related
//! lookup shapes from one table, and a `petgraph` directed graph serves the
//! code/knowledge-graph queries. None of these mutate kernel state; they
//! are plain read models a caller seeds independently.

use crate::bridge::{ExternalPredicateBridge, FnHandler, Mode};
use crate::term::Term;
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::sync::Arc;

fn as_text(term: &Term) -> Option<&str> {
    match term {
        Term::String(s) | Term::Name(s) => Some(s),
        _ => None,
    }
}

/// HashMap-backed table serving `query_learned/2`, `has_learned/1`,
/// `query_strategic/3`, and `query_activations/2` — distinguished by key
/// prefix, serving several related lookup shapes from one table. In-memory
/// only; nothing here is written to the
/// persistent store (there is no `Learned` fact category, only
/// Persistent/Ephemeral/Derived — see `schema::PredicateCategory`).
#[derive(Debug, Default)]
pub struct LearnedMemoryHandler {
    entries: RwLock<HashMap<String, Vec<Vec<Term>>>>,
}

impl LearnedMemoryHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one full output row under `key`. Callers supply rows already
    /// shaped to the arity of whichever predicate will read them back
    /// (2-tuples for `query_learned`, 3-tuples for `query_strategic`, …).
    /// Repeated calls accumulate.
    pub fn learn(&self, key: impl Into<String>, row: Vec<Term>) {
        self.entries.write().entry(key.into()).or_default().push(row);
    }

    fn all_rows(&self) -> Vec<Vec<Term>> {
        self.entries.read().values().flatten().cloned().collect()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    fn keyed_rows(&self, prefix: &str) -> Vec<Vec<Term>> {
        self.entries
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }
}

/// Ephemeral, session-scoped key/value table backing `query_session/3`.
/// Never persisted: a session's entries die with the process, matching
/// spec.md's "ephemeral per shard, not cross-shard" session semantics.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Vec<(Term, Term)>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session_id: impl Into<String>, key: Term, value: Term) {
        self.sessions
            .write()
            .entry(session_id.into())
            .or_default()
            .push((key, value));
    }

    fn lookup(&self, session_id: &str) -> Vec<Vec<Term>> {
        self.sessions
            .read()
            .get(session_id)
            .map(|rows| {
                rows.iter()
                    .map(|(k, v)| vec![Term::string(session_id.to_string()), k.clone(), v.clone()])
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Directed code/knowledge graph backing `recall_similar/3`,
/// `query_knowledge_graph/3`, and `query_graph/3`. Built on `petgraph`, the
/// same crate and traversal style `stratify.rs` uses for the predicate
/// dependency graph.
#[derive(Debug, Default)]
pub struct CodeGraphHandler {
    graph: RwLock<DiGraph<String, f64>>,
    index_of: RwLock<HashMap<String, NodeIndex>>,
}

impl CodeGraphHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, label: &str) -> NodeIndex {
        if let Some(idx) = self.index_of.read().get(label) {
            return *idx;
        }
        let idx = self.graph.write().add_node(label.to_string());
        self.index_of.write().insert(label.to_string(), idx);
        idx
    }

    /// Add a weighted edge (e.g. similarity score, or a knowledge-graph
    /// relation strength) between two nodes.
    pub fn link(&self, from: &str, to: &str, weight: f64) {
        let a = self.node(from);
        let b = self.node(to);
        self.graph.write().add_edge(a, b, weight);
    }

    fn neighbors(&self, from: &str) -> Vec<Vec<Term>> {
        let Some(idx) = self.index_of.read().get(from).copied() else {
            return Vec::new();
        };
        let graph = self.graph.read();
        graph
            .edges(idx)
            .map(|edge| {
                let target = &graph[edge.target()];
                vec![
                    Term::string(from.to_string()),
                    Term::string(target.clone()),
                    Term::float(*edge.weight()),
                ]
            })
            .collect()
    }

    fn edges_between(&self, from: &str, to: &str) -> Vec<Vec<Term>> {
        self.neighbors(from)
            .into_iter()
            .filter(|row| matches!(&row[1], Term::String(t) if t == to))
            .collect()
    }
}

/// Registers every default handler spec.md §4.2 enumerates onto `bridge`,
/// returning the handles so a caller (the CLI, tests, or `VirtualStore`)
/// can seed data into them. `query_traces`/`query_trace_stats` are *not*
/// registered here — they are wired by `VirtualStore::new`, since they
/// read the execution trace log `VirtualStore` itself owns.
pub struct DefaultHandlers {
    pub learned: Arc<LearnedMemoryHandler>,
    pub sessions: Arc<SessionTable>,
    pub graph: Arc<CodeGraphHandler>,
}

pub fn register_default_handlers(bridge: &ExternalPredicateBridge) -> DefaultHandlers {
    let learned = Arc::new(LearnedMemoryHandler::new());
    let sessions = Arc::new(SessionTable::new());
    let graph = Arc::new(CodeGraphHandler::new());

    {
        let learned = learned.clone();
        bridge.register(
            "query_learned",
            vec![Mode::Output, Mode::Output],
            Arc::new(FnHandler(move |_inputs| Ok(learned.all_rows()))),
        );
    }
    {
        let learned = learned.clone();
        bridge.register(
            "has_learned",
            vec![Mode::Output],
            Arc::new(FnHandler(move |_inputs| {
                Ok(learned.keys().into_iter().map(|k| vec![Term::string(k)]).collect())
            })),
        );
    }
    {
        let learned = learned.clone();
        bridge.register(
            "query_strategic",
            vec![Mode::Output, Mode::Output, Mode::Output],
            Arc::new(FnHandler(move |_inputs| Ok(learned.keyed_rows("strategic:")))),
        );
    }
    {
        let learned = learned.clone();
        bridge.register(
            "query_activations",
            vec![Mode::Output, Mode::Output],
            Arc::new(FnHandler(move |_inputs| Ok(learned.keyed_rows("activation:")))),
        );
    }
    {
        let sessions = sessions.clone();
        bridge.register(
            "query_session",
            vec![Mode::Input, Mode::Output, Mode::Output],
            Arc::new(FnHandler(move |inputs| {
                let session_id = as_text(&inputs[0]).ok_or("query_session: non-text session id")?;
                Ok(sessions.lookup(session_id))
            })),
        );
    }
    {
        let graph = graph.clone();
        bridge.register(
            "recall_similar",
            vec![Mode::Input, Mode::Output, Mode::Output],
            Arc::new(FnHandler(move |inputs| {
                let from = as_text(&inputs[0]).ok_or("recall_similar: non-text node")?;
                Ok(graph.neighbors(from))
            })),
        );
    }
    {
        let graph = graph.clone();
        bridge.register(
            "query_knowledge_graph",
            vec![Mode::Input, Mode::Output, Mode::Output],
            Arc::new(FnHandler(move |inputs| {
                let from = as_text(&inputs[0]).ok_or("query_knowledge_graph: non-text node")?;
                Ok(graph.neighbors(from))
            })),
        );
    }
    {
        let graph = graph.clone();
        bridge.register(
            "query_graph",
            vec![Mode::Input, Mode::Input, Mode::Output],
            Arc::new(FnHandler(move |inputs| {
                let from = as_text(&inputs[0]).ok_or("query_graph: non-text node")?;
                let to = as_text(&inputs[1]).ok_or("query_graph: non-text node")?;
                Ok(graph.edges_between(from, to))
            })),
        );
    }
    bridge.register(
        "string_contains",
        vec![Mode::Input, Mode::Input],
        Arc::new(FnHandler(|inputs| {
            let haystack = as_text(&inputs[0]).ok_or("string_contains: non-text haystack")?;
            let needle = as_text(&inputs[1]).ok_or("string_contains: non-text needle")?;
            Ok(if haystack.contains(needle) {
                vec![vec![]]
            } else {
                vec![]
            })
        })),
    );

    DefaultHandlers {
        learned,
        sessions,
        graph,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ExternalPredicateBridge;

    #[test]
    fn test_query_learned_roundtrip() {
        let bridge = ExternalPredicateBridge::new();
        let handlers = register_default_handlers(&bridge);
        handlers
            .learned
            .learn("topic:rust", vec![Term::string("topic:rust"), Term::string("ownership")]);
        let rows = bridge.resolve("query_learned", &[]);
        assert_eq!(rows, vec![vec![Term::string("topic:rust"), Term::string("ownership")]]);
    }

    #[test]
    fn test_has_learned_lists_keys() {
        let bridge = ExternalPredicateBridge::new();
        let handlers = register_default_handlers(&bridge);
        handlers.learned.learn("topic:rust", vec![Term::string("x")]);
        let rows = bridge.resolve("has_learned", &[]);
        assert_eq!(rows, vec![vec![Term::string("topic:rust")]]);
    }

    #[test]
    fn test_query_strategic_returns_full_arity_rows() {
        let bridge = ExternalPredicateBridge::new();
        let handlers = register_default_handlers(&bridge);
        handlers.learned.learn(
            "strategic:refactor",
            vec![Term::name("refactor"), Term::string("extract-fn"), Term::float(0.8)],
        );
        let rows = bridge.resolve("query_strategic", &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 3);
    }

    #[test]
    fn test_query_session_scoped_by_id() {
        let bridge = ExternalPredicateBridge::new();
        let handlers = register_default_handlers(&bridge);
        handlers.sessions.set("s1", Term::name("k"), Term::Integer(1));
        handlers.sessions.set("s2", Term::name("k"), Term::Integer(2));
        let rows = bridge.resolve("query_session", &[Term::string("s1")]);
        assert_eq!(rows, vec![vec![Term::string("s1"), Term::name("k"), Term::Integer(1)]]);
    }

    #[test]
    fn test_recall_similar_reads_graph_edges() {
        let bridge = ExternalPredicateBridge::new();
        let handlers = register_default_handlers(&bridge);
        handlers.graph.link("a.rs", "b.rs", 0.9);
        let rows = bridge.resolve("recall_similar", &[Term::string("a.rs")]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Term::string("b.rs"));
    }

    #[test]
    fn test_string_contains_true_and_false() {
        let bridge = ExternalPredicateBridge::new();
        register_default_handlers(&bridge);
        assert_eq!(
            bridge.resolve("string_contains", &[Term::string("hello world"), Term::string("world")]),
            vec![vec![]]
        );
        assert!(bridge
            .resolve("string_contains", &[Term::string("hello"), Term::string("bye")])
            .is_empty());
    }
}
