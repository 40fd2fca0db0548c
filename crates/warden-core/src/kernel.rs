//! Logic Kernel (§4.1)
//!
//! Holds schema + policy + learned-rule text, accepts Asserts/Retracts,
//! compiles and evaluates to fixpoint, answers predicate queries, and
//! clones for shadow use. A single `parking_lot::RwLock` protects EDB,
//! index, atom cache, schemas, policy, learned text, program-info pointer,
//! and the initialized flag (§5) — writers are `Assert`/`Retract`/`Set*`/
//! `Evaluate`/`Clone`; readers are `Query`/`QueryAll`/`IsInitialized`/
//! `FactCount`.

use crate::bridge::ExternalPredicateBridge;
use crate::error::{KernelError, ProgramError, SchemaError, WardenError};
use crate::evaluate::{evaluate, mode_check};
use crate::schema::{PredicateCategory, PredicateDecl, Schema};
use crate::source::{parse_source, DeclNode, Item, RuleNode};
use crate::stratify::{stratify, Stratification};
use crate::term::{Fact, Term};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of the last successful compile: the parsed, stratified rule set.
/// Cached so `Assert`/`Retract` that don't touch program text can skip
/// re-parsing; invalidated whenever the program is marked dirty.
#[derive(Clone, Default)]
struct ProgramInfo {
    rules: Vec<RuleNode>,
    strata: Option<Arc<Stratification>>,
}

/// `Uninitialized → Loaded(schema+policy) → Evaluated → (Evaluated | Dirty)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KernelState {
    Uninitialized,
    Loaded,
    Evaluated,
    Dirty,
}

struct Inner {
    schema_text: String,
    policy_text: String,
    learned_text: String,
    schema: Schema,
    edb: Vec<Fact>,
    /// Fingerprints of facts currently in `edb`, for I3/I7 dedup.
    index: HashSet<String>,
    program: ProgramInfo,
    derived_cache: Vec<Fact>,
    state: KernelState,
    dirty: bool,
    max_facts: usize,
}

impl Inner {
    fn new(max_facts: usize) -> Self {
        Self {
            schema_text: String::new(),
            policy_text: String::new(),
            learned_text: String::new(),
            schema: Schema::new(),
            edb: Vec::new(),
            index: HashSet::new(),
            program: ProgramInfo::default(),
            derived_cache: Vec::new(),
            state: KernelState::Uninitialized,
            dirty: true,
            max_facts,
        }
    }
}

/// The concurrent, stratified Datalog evaluator.
pub struct LogicKernel {
    inner: RwLock<Inner>,
    bridge: Arc<ExternalPredicateBridge>,
    gas_cap: usize,
}

impl LogicKernel {
    pub fn new(max_facts: usize, gas_cap: usize, bridge: Arc<ExternalPredicateBridge>) -> Self {
        Self {
            inner: RwLock::new(Inner::new(max_facts)),
            bridge,
            gas_cap,
        }
    }

    pub fn bridge(&self) -> &Arc<ExternalPredicateBridge> {
        &self.bridge
    }

    /// Replace the schema source text; marks the program dirty. Does not
    /// validate until the next `Evaluate`.
    pub fn set_schemas(&self, text: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.schema_text = text.into();
        inner.dirty = true;
        if inner.state == KernelState::Uninitialized {
            inner.state = KernelState::Loaded;
        }
    }

    /// Append to the policy source text; marks the program dirty.
    pub fn append_policy(&self, text: impl AsRef<str>) {
        let mut inner = self.inner.write();
        if !inner.policy_text.is_empty() {
            inner.policy_text.push('\n');
        }
        inner.policy_text.push_str(text.as_ref());
        inner.dirty = true;
        if inner.state == KernelState::Uninitialized {
            inner.state = KernelState::Loaded;
        }
    }

    /// Replace the learned-rule source text; marks the program dirty.
    /// Rule text across `AppendPolicy` calls is appended without dedup of
    /// equal rules (noted in the design notes; acceptable, memory-only
    /// cost).
    pub fn set_learned(&self, text: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.learned_text = text.into();
        inner.dirty = true;
    }

    /// Assert a single fact. Declared-predicate check against schema;
    /// idempotent under I3 — if already indexed, returns without error or
    /// change.
    pub fn assert(&self, predicate: &str, args: Vec<Term>) -> Result<(), WardenError> {
        self.assert_batch(std::iter::once((predicate.to_string(), args)))
    }

    /// Assert many facts atomically under the write lock, so concurrent
    /// asserters cannot interleave (§5). Facts already declared Derived
    /// are rejected at the schema level the same as any undeclared
    /// predicate would be (I1/I2 enforcement happens together here).
    pub fn assert_batch(
        &self,
        facts: impl IntoIterator<Item = (String, Vec<Term>)>,
    ) -> Result<(), WardenError> {
        let mut inner = self.inner.write();
        let span = tracing::debug_span!("assert_batch");
        let _enter = span.enter();

        for (predicate, args) in facts {
            self.reparse_if_dirty(&mut inner)?;

            inner
                .schema
                .validate_fact(&predicate, &args)
                .map_err(SchemaError::from)?;

            if inner.schema.category_of(&predicate) == Some(PredicateCategory::Derived) {
                return Err(SchemaError::Unknown(predicate).into());
            }

            let fact = Fact::new(predicate, args);
            let key = fact.fingerprint();
            if inner.index.contains(&key) {
                continue; // I3: idempotent
            }
            if inner.edb.len() >= inner.max_facts {
                return Err(SchemaError::Capacity {
                    current: inner.edb.len(),
                    limit: inner.max_facts,
                }
                .into());
            }
            inner.index.insert(key);
            tracing::trace!(fact = %fact, "asserted");
            inner.edb.push(fact);
        }

        if inner.state != KernelState::Uninitialized {
            inner.state = KernelState::Dirty;
        }
        Ok(())
    }

    /// Drop all facts with `predicate` from EDB, index, and program cache
    /// (P2: `Retract` is idempotent).
    pub fn retract(&self, predicate: &str) {
        let mut inner = self.inner.write();
        let mut removed_keys = Vec::new();
        inner.edb.retain(|f| {
            if f.predicate == predicate {
                removed_keys.push(f.fingerprint());
                false
            } else {
                true
            }
        });
        for key in removed_keys {
            inner.index.remove(&key);
        }
        inner.dirty = true;
    }

    /// When `args.len() == 1`, remove all facts sharing predicate and
    /// first arg; with full args supplied, remove exact matches.
    pub fn retract_fact(&self, predicate: &str, args: &[Term]) {
        let mut inner = self.inner.write();
        let mut removed_keys = Vec::new();
        if args.len() == 1 {
            let first = args[0].clone();
            inner.edb.retain(|f| {
                if f.matches_predicate_and_first_arg(predicate, &first) {
                    removed_keys.push(f.fingerprint());
                    false
                } else {
                    true
                }
            });
        } else {
            inner.edb.retain(|f| {
                if f.predicate == predicate && f.args == args {
                    removed_keys.push(f.fingerprint());
                    false
                } else {
                    true
                }
            });
        }
        for key in removed_keys {
            inner.index.remove(&key);
        }
        inner.dirty = true;
    }

    fn reparse_if_dirty(&self, inner: &mut Inner) -> Result<(), WardenError> {
        if !inner.dirty {
            return Ok(());
        }
        let full_text = format!(
            "{}\n{}\n{}",
            inner.schema_text, inner.policy_text, inner.learned_text
        );
        let items = parse_source(&full_text).map_err(ProgramError::from)?;

        let mut schema = Schema::new();
        let mut rules = Vec::new();
        let mut extra_facts = Vec::new();

        for item in items {
            match item {
                Item::Decl(DeclNode {
                    predicate,
                    arg_types,
                    category,
                    ..
                }) => {
                    schema.declare(PredicateDecl {
                        name: predicate,
                        arg_types,
                        category,
                    });
                }
                Item::Rule(rule) => rules.push(rule),
                Item::Fact(f) => extra_facts.push(Fact::new(f.predicate, f.args)),
                Item::Directive(d) => {
                    for f in d.desugar() {
                        extra_facts.push(Fact::new(f.predicate, f.args));
                    }
                }
            }
        }

        for rule in &rules {
            schema.promote_to_derived(&rule.head_predicate);
        }

        mode_check(&rules, &self.bridge).map_err(ProgramError::from)?;

        inner.schema = schema;
        inner.program = ProgramInfo {
            rules,
            strata: None,
        };

        for fact in extra_facts {
            let key = fact.fingerprint();
            if inner.index.insert(key) {
                inner.edb.push(fact);
            }
        }

        inner.dirty = false;
        Ok(())
    }

    /// Recompile if dirty, build a fresh derived store seeded from the EDB,
    /// invoke the stratified fixpoint evaluator with the gas cap, and on
    /// success replace the live derived store.
    pub fn evaluate(&self) -> Result<(), WardenError> {
        let mut inner = self.inner.write();
        let span = tracing::debug_span!("evaluate");
        let _enter = span.enter();

        self.reparse_if_dirty(&mut inner)?;

        let strata = match &inner.program.strata {
            Some(s) => s.clone(),
            None => {
                let computed = stratify(&inner.program.rules).map_err(ProgramError::from)?;
                let arc = Arc::new(computed);
                inner.program.strata = Some(arc.clone());
                arc
            }
        };

        let result = evaluate(
            &inner.edb,
            &inner.program.rules,
            &strata,
            &self.bridge,
            self.gas_cap,
        )?;

        inner.derived_cache = result.derived;
        for (symbol, count) in self.bridge.error_count_facts() {
            inner.derived_cache.push(Fact::new(
                "external_error_count",
                vec![Term::name(symbol), Term::Integer(count as i64)],
            ));
        }
        inner.state = KernelState::Evaluated;

        Ok(())
    }

    /// All facts (EDB+IDB+external) whose predicate equals `predicate`.
    /// Fails `NotInitialized` if never evaluated.
    pub fn query(&self, predicate: &str) -> Result<Vec<Fact>, WardenError> {
        let inner = self.inner.read();
        if inner.state == KernelState::Uninitialized {
            return Err(KernelError::NotInitialized.into());
        }
        Ok(inner
            .derived_cache
            .iter()
            .filter(|f| f.predicate == predicate)
            .cloned()
            .collect())
    }

    /// All known facts, regardless of predicate.
    pub fn query_all(&self) -> Result<Vec<Fact>, WardenError> {
        let inner = self.inner.read();
        if inner.state == KernelState::Uninitialized {
            return Err(KernelError::NotInitialized.into());
        }
        Ok(inner.derived_cache.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().state != KernelState::Uninitialized
    }

    pub fn fact_count(&self) -> usize {
        self.inner.read().edb.len()
    }

    /// The compiled category of `predicate` (Persistent/Ephemeral/Derived),
    /// or `None` if it is not declared. Reflects the same schema
    /// `Evaluate`/`Assert` consult — Derived predicates show up here once
    /// stratification has promoted them, regardless of how they were
    /// declared.
    pub fn category_of(&self, predicate: &str) -> Option<PredicateCategory> {
        self.inner.read().schema.category_of(predicate)
    }

    /// Deep copy of EDB, atom cache, index, schema, and program text;
    /// shares the immutable bridge registrations; independent derived
    /// store (P5: clone isolation). Used by the Dream and Transaction
    /// Manager.
    pub fn clone_kernel(&self) -> LogicKernel {
        let inner = self.inner.read();
        let cloned_inner = Inner {
            schema_text: inner.schema_text.clone(),
            policy_text: inner.policy_text.clone(),
            learned_text: inner.learned_text.clone(),
            schema: inner.schema.clone(),
            edb: inner.edb.clone(),
            index: inner.index.clone(),
            program: inner.program.clone(),
            derived_cache: inner.derived_cache.clone(),
            state: inner.state,
            dirty: inner.dirty,
            max_facts: inner.max_facts,
        };
        LogicKernel {
            inner: RwLock::new(cloned_inner),
            bridge: self.bridge.clone(),
            gas_cap: self.gas_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn new_kernel() -> LogicKernel {
        LogicKernel::new(100_000, 500_000, Arc::new(ExternalPredicateBridge::new()))
    }

    /// S1: concurrent duplicate assert.
    #[test]
    fn test_s1_concurrent_duplicate_assert() {
        let kernel = Arc::new(new_kernel());
        kernel.set_schemas("Decl unique(Name).");

        let mut handles = Vec::new();
        for _ in 0..100 {
            let k = kernel.clone();
            handles.push(thread::spawn(move || {
                k.assert_batch(std::iter::once((
                    "unique".to_string(),
                    vec![Term::name("singleton")],
                )))
                .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        kernel.evaluate().unwrap();
        let results = kernel.query("unique").unwrap();
        assert_eq!(results.len(), 1);
    }

    /// S2: conflicting status facts coexist, no panic_state derived.
    #[test]
    fn test_s2_conflicting_status() {
        let kernel = new_kernel();
        kernel.set_schemas("Decl task_status(Name, Name).");
        kernel
            .assert("task_status", vec![Term::name("t1"), Term::name("completed")])
            .unwrap();
        kernel
            .assert("task_status", vec![Term::name("t1"), Term::name("failed")])
            .unwrap();
        kernel.evaluate().unwrap();
        let results = kernel.query("task_status").unwrap();
        assert_eq!(results.len(), 2);
        assert!(kernel.query("panic_state").unwrap().is_empty());
    }

    #[test]
    fn test_p2_idempotent_retract() {
        let kernel = new_kernel();
        kernel.set_schemas("Decl p(Name).");
        kernel.assert("p", vec![Term::name("x")]).unwrap();
        kernel.retract("p");
        kernel.retract("p");
        kernel.evaluate().unwrap();
        assert!(kernel.query("p").unwrap().is_empty());
    }

    #[test]
    fn test_not_initialized_error() {
        let kernel = new_kernel();
        let err = kernel.query("p").unwrap_err();
        assert!(matches!(err, WardenError::Kernel(KernelError::NotInitialized)));
    }

    #[test]
    fn test_capacity_error() {
        let kernel = LogicKernel::new(1, 500_000, Arc::new(ExternalPredicateBridge::new()));
        kernel.set_schemas("Decl p(Name).");
        kernel.assert("p", vec![Term::name("a")]).unwrap();
        let err = kernel.assert("p", vec![Term::name("b")]).unwrap_err();
        assert!(matches!(
            err,
            WardenError::Schema(SchemaError::Capacity { .. })
        ));
    }

    /// P5: clone isolation.
    #[test]
    fn test_p5_clone_isolation() {
        let kernel = new_kernel();
        kernel.set_schemas("Decl p(Name).");
        kernel.assert("p", vec![Term::name("a")]).unwrap();
        kernel.evaluate().unwrap();

        let clone = kernel.clone_kernel();
        clone.assert("p", vec![Term::name("b")]).unwrap();
        clone.evaluate().unwrap();

        assert_eq!(kernel.query("p").unwrap().len(), 1);
        assert_eq!(clone.query("p").unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_predicate_rejected() {
        let kernel = new_kernel();
        kernel.set_schemas("Decl p(Name).");
        let err = kernel.assert("q", vec![Term::name("a")]).unwrap_err();
        assert!(matches!(err, WardenError::Schema(SchemaError::Unknown(_))));
    }

    /// An `ephemeral` declaration must actually reach the schema as
    /// `PredicateCategory::Ephemeral`, not be silently downgraded to
    /// Persistent by the compile step.
    #[test]
    fn test_ephemeral_decl_reaches_schema_as_ephemeral() {
        let kernel = new_kernel();
        kernel.set_schemas("Decl ephemeral user_intent(Name, String).\nDecl task_status(Name, Name).");
        kernel
            .assert("user_intent", vec![Term::name("verb"), Term::string("target")])
            .unwrap();
        kernel.evaluate().unwrap();

        assert_eq!(kernel.category_of("user_intent"), Some(PredicateCategory::Ephemeral));
        assert_eq!(kernel.category_of("task_status"), Some(PredicateCategory::Persistent));
    }
}
