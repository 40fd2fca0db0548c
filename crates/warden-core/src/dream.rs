//! Dream / Shadow Engine (§4.5)
//!
//! Given a pending `ActionRequest`, clones the live kernel, projects the
//! action's hypothetical effects as facts into the clone, re-evaluates,
//! and inspects `panic_state(aid, reason)`. Follows a "compute a decision
//! struct from cloned state" shape, generalized from a single
//! alignment-score threshold check to full projected-fact simulation. The
//! clone is discarded after use; Dream never writes to the live kernel (P8).

use crate::action::ActionType;
use crate::kernel::LogicKernel;
use crate::term::{Fact, Term};

/// Outcome of one Dream simulation.
#[derive(Debug, Clone)]
pub struct DreamResult {
    pub unsafe_: bool,
    pub reason: Option<String>,
    pub action_id: String,
    pub projected_facts: Vec<Fact>,
}

/// Paths treated as sensitive for the purpose of projecting
/// `critical_path_hit` on deletion; the kind of guardrail check an
/// alignment layer performs on workspace paths.
fn is_sensitive_path(target: &str) -> bool {
    const SENSITIVE_FRAGMENTS: &[&str] = &[".git/", "Cargo.lock", "/etc/", ".env"];
    SENSITIVE_FRAGMENTS.iter().any(|f| target.contains(f))
}

/// Project an action's hypothetical effects into fact form, without
/// touching the filesystem or the live kernel.
fn project_facts(action_id: &str, action_type: ActionType, target: &str) -> Vec<Fact> {
    let mut facts = Vec::new();
    match action_type {
        ActionType::DeleteFile => {
            facts.push(Fact::new(
                "projected_fact",
                vec![Term::name(action_id), Term::name("file_missing")],
            ));
            if is_sensitive_path(target) {
                facts.push(Fact::new(
                    "projected_fact",
                    vec![Term::name(action_id), Term::name("critical_path_hit")],
                ));
            }
        }
        ActionType::WriteFile | ActionType::EditFile => {
            facts.push(Fact::new(
                "projected_fact",
                vec![Term::name(action_id), Term::name("file_modified")],
            ));
        }
        ActionType::ExecCmd | ActionType::GitOperation => {
            facts.push(Fact::new(
                "projected_fact",
                vec![Term::name(action_id), Term::name("side_effecting_command")],
            ));
        }
        _ => {}
    }
    facts
}

/// Clone the kernel, project the action's hypothetical effects, and
/// re-evaluate to detect a derived `panic_state`.
pub fn dream(
    kernel: &LogicKernel,
    action_id: &str,
    action_type: ActionType,
    target: &str,
    declared_predicate: Option<&str>,
) -> DreamResult {
    let shadow = kernel.clone_kernel();
    let projected = project_facts(action_id, action_type, target);

    if let Some(pred) = declared_predicate {
        for fact in &projected {
            let _ = shadow.assert(pred, fact.args.clone());
        }
    } else {
        for fact in &projected {
            let _ = shadow.assert(&fact.predicate, fact.args.clone());
        }
    }

    if shadow.evaluate().is_err() {
        // A shadow that fails to evaluate is treated as inconclusive, not
        // unsafe; Prepare will still see the parse/stratification error
        // surfaced through its own call to Evaluate.
        return DreamResult {
            unsafe_: false,
            reason: None,
            action_id: action_id.to_string(),
            projected_facts: projected,
        };
    }

    let panics = shadow.query("panic_state").unwrap_or_default();
    let hit = panics
        .iter()
        .find(|f| f.args.first() == Some(&Term::name(action_id)));

    match hit {
        Some(fact) => DreamResult {
            unsafe_: true,
            reason: fact.args.get(1).map(|t| t.to_string()),
            action_id: action_id.to_string(),
            projected_facts: projected,
        },
        None => DreamResult {
            unsafe_: false,
            reason: None,
            action_id: action_id.to_string(),
            projected_facts: projected,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ExternalPredicateBridge;
    use std::sync::Arc;

    fn new_kernel() -> LogicKernel {
        let kernel = LogicKernel::new(1000, 500_000, Arc::new(ExternalPredicateBridge::new()));
        kernel.set_schemas("Decl projected_fact(Name, Name).");
        kernel.append_policy(
            "panic_state(AID, /critical_path_hit) :- projected_fact(AID, /critical_path_hit).",
        );
        kernel
    }

    /// P8: shadow non-interference.
    #[test]
    fn test_p8_shadow_non_interference() {
        let kernel = new_kernel();
        kernel.evaluate().unwrap();
        let before = kernel.query_all().unwrap().len();

        let _ = dream(&kernel, "a1", ActionType::DeleteFile, ".git/HEAD", Some("projected_fact"));

        let after = kernel.query_all().unwrap().len();
        assert_eq!(before, after);
    }

    #[test]
    fn test_dream_detects_panic_on_sensitive_path() {
        let kernel = new_kernel();
        kernel.evaluate().unwrap();
        let result = dream(&kernel, "a1", ActionType::DeleteFile, ".git/HEAD", Some("projected_fact"));
        assert!(result.unsafe_);
    }

    #[test]
    fn test_dream_safe_on_ordinary_path() {
        let kernel = new_kernel();
        kernel.evaluate().unwrap();
        let result = dream(&kernel, "a1", ActionType::DeleteFile, "src/main.rs", Some("projected_fact"));
        assert!(!result.unsafe_);
    }
}
