//! Virtual External-Predicate Bridge (§4.2)
//!
//! Lets selected predicate symbols be resolved by in-process handlers while
//! preserving ordinary Datalog evaluation semantics. A registration
//! associates a predicate symbol and arity with a mode vector (each
//! position Input or Output) and a handler that, given the bound inputs,
//! returns a finite set of output tuples.
//!
//! Handler errors are fail-open: logged at `tracing::warn!` and treated as
//! an empty extension for that call, per the Open Question resolution —
//! the failure also increments a per-symbol counter exposed as the
//! diagnostic predicate `external_error_count(symbol, count)`.

use crate::term::Term;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Binding mode for one argument position of an external predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
}

/// A handler resolves bound input constants into a finite set of output
/// tuples (full arity; input positions echoed back, output positions
/// filled in). Implementations must not mutate kernel state.
pub trait ExternalHandler: Send + Sync {
    fn call(&self, inputs: &[Term]) -> Result<Vec<Vec<Term>>, String>;
}

/// Wraps a plain closure as an `ExternalHandler`.
pub struct FnHandler<F>(pub F)
where
    F: Fn(&[Term]) -> Result<Vec<Vec<Term>>, String> + Send + Sync;

impl<F> ExternalHandler for FnHandler<F>
where
    F: Fn(&[Term]) -> Result<Vec<Vec<Term>>, String> + Send + Sync,
{
    fn call(&self, inputs: &[Term]) -> Result<Vec<Vec<Term>>, String> {
        (self.0)(inputs)
    }
}

struct Registration {
    modes: Vec<Mode>,
    handler: Arc<dyn ExternalHandler>,
}

/// Registry of external predicates plus per-cycle memoization and the
/// fail-open diagnostic counters.
pub struct ExternalPredicateBridge {
    registrations: RwLock<HashMap<String, Registration>>,
    /// (symbol, input-tuple canonical key) -> resolved outputs, cleared at
    /// the start of every `Evaluate`.
    memo: Mutex<HashMap<(String, String), Vec<Vec<Term>>>>,
    error_counts: RwLock<HashMap<String, AtomicUsize>>,
}

impl Default for ExternalPredicateBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalPredicateBridge {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            memo: Mutex::new(HashMap::new()),
            error_counts: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        symbol: impl Into<String>,
        modes: Vec<Mode>,
        handler: Arc<dyn ExternalHandler>,
    ) {
        self.registrations
            .write()
            .insert(symbol.into(), Registration { modes, handler });
    }

    pub fn is_registered(&self, symbol: &str) -> bool {
        self.registrations.read().contains_key(symbol)
    }

    pub fn modes_of(&self, symbol: &str) -> Option<Vec<Mode>> {
        self.registrations.read().get(symbol).map(|r| r.modes.clone())
    }

    /// Clear the per-cycle memoization. Called by the evaluator at the
    /// start of every `Evaluate`.
    pub fn begin_cycle(&self) {
        self.memo.lock().clear();
    }

    /// Resolve a call, given the Input-position values in positional
    /// order matching `modes_of(symbol)`. Fail-open: handler errors become
    /// an empty result and increment the symbol's error counter.
    pub fn resolve(&self, symbol: &str, inputs: &[Term]) -> Vec<Vec<Term>> {
        let key_str = inputs
            .iter()
            .map(Term::canonical)
            .collect::<Vec<_>>()
            .join("|");
        let memo_key = (symbol.to_string(), key_str);

        if let Some(hit) = self.memo.lock().get(&memo_key) {
            return hit.clone();
        }

        let handler = {
            let regs = self.registrations.read();
            regs.get(symbol).map(|r| r.handler.clone())
        };

        let result = match handler {
            Some(h) => match h.call(inputs) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(symbol, error = %e, "external predicate handler failed; fail-open to empty extension");
                    self.record_error(symbol);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        self.memo.lock().insert(memo_key, result.clone());
        result
    }

    fn record_error(&self, symbol: &str) {
        let counters = self.error_counts.read();
        if let Some(counter) = counters.get(symbol) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(counters);
        self.error_counts
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| AtomicUsize::new(1));
    }

    /// Diagnostic facts `external_error_count(symbol, count)` for every
    /// symbol that has failed at least once since the bridge was created.
    pub fn error_count_facts(&self) -> Vec<(String, usize)> {
        self.error_counts
            .read()
            .iter()
            .map(|(symbol, count)| (symbol.clone(), count.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_open_on_handler_error() {
        let bridge = ExternalPredicateBridge::new();
        bridge.register(
            "flaky",
            vec![Mode::Input, Mode::Output],
            Arc::new(FnHandler(|_inputs| Err("boom".to_string()))),
        );
        let out = bridge.resolve("flaky", &[Term::name("x")]);
        assert!(out.is_empty());
        let counts = bridge.error_count_facts();
        assert_eq!(counts, vec![("flaky".to_string(), 1)]);
    }

    #[test]
    fn test_memoization_within_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let bridge = ExternalPredicateBridge::new();
        bridge.register(
            "string_contains",
            vec![Mode::Input, Mode::Input],
            Arc::new(FnHandler(move |_inputs| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(vec![vec![]])
            })),
        );
        bridge.resolve("string_contains", &[Term::string("a"), Term::string("b")]);
        bridge.resolve("string_contains", &[Term::string("a"), Term::string("b")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bridge.begin_cycle();
        bridge.resolve("string_contains", &[Term::string("a"), Term::string("b")]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregistered_symbol_resolves_empty() {
        let bridge = ExternalPredicateBridge::new();
        assert!(bridge.resolve("nope", &[]).is_empty());
    }
}
