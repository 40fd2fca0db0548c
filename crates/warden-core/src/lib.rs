//! Warden Core — the runtime kernel of an agentic code-modification
//! platform.
//!
//! Warden is built on a triad:
//!
//! 1. **Logic Kernel** (`kernel`): a concurrent, stratified Datalog
//!    evaluator over a closed Term/Fact universe (`term`, `schema`,
//!    `source`, `stratify`, `evaluate`).
//! 2. **External-Predicate Bridge** (`bridge`): fail-open handlers for
//!    predicates the evaluator cannot derive on its own.
//! 3. **Action Pipeline** (`action`, `validator`, `dream`, `transaction`,
//!    `virtual_store`): a router that gates, simulates, executes, and
//!    validates one agent action at a time, feeding the outcome back into
//!    the kernel as new facts.
//!
//! `limits` enforces the session's resource ceilings; `store` persists
//! Persistent-category facts across session boundaries; `config` and
//! `telemetry` are the ambient configuration/logging surface; `executor`
//! defines the external collaborator that `warden-exec` implements.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use warden_core::bridge::ExternalPredicateBridge;
//! use warden_core::kernel::LogicKernel;
//! use warden_core::term::Term;
//!
//! let kernel = LogicKernel::new(10_000, 500_000, Arc::new(ExternalPredicateBridge::new()));
//! kernel.set_schemas("Decl task_status(Name, Name).");
//! kernel.assert("task_status", vec![Term::name("t1"), Term::name("completed")]).unwrap();
//! kernel.evaluate().unwrap();
//! assert_eq!(kernel.query("task_status").unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod action;
pub mod bridge;
pub mod config;
pub mod dream;
pub mod error;
pub mod evaluate;
pub mod executor;
pub mod handlers;
pub mod kernel;
pub mod limits;
pub mod schema;
pub mod source;
pub mod store;
pub mod stratify;
pub mod telemetry;
pub mod term;
pub mod transaction;
pub mod types;
pub mod validator;
pub mod virtual_store;

pub use action::{ActionPayload, ActionRequest, ActionResult, ActionType};
pub use bridge::ExternalPredicateBridge;
pub use config::KernelConfig;
pub use error::{Result, WardenError};
pub use handlers::{register_default_handlers, DefaultHandlers};
pub use kernel::LogicKernel;
pub use schema::{PredicateCategory, Schema};
pub use term::{Fact, Term};
pub use virtual_store::VirtualStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;

    /// An end-to-end smoke test exercising schema, assert, evaluate, query
    /// and a negated rule together — not a substitute for the per-module
    /// unit tests, just confirmation the public surface composes.
    #[test]
    fn test_end_to_end_kernel_workflow() {
        let kernel = LogicKernel::new(1_000, 500_000, Arc::new(ExternalPredicateBridge::new()));
        kernel.set_schemas(
            "Decl task_status(Name, Name).\n\
             Decl blocked(Name).",
        );
        kernel.append_policy("blocked(T) :- task_status(T, /failed), not task_status(T, /completed).");

        kernel
            .assert("task_status", vec![Term::name("t1"), Term::name("failed")])
            .unwrap();
        kernel.evaluate().unwrap();

        let blocked = kernel.query("blocked").unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].args[0], Term::name("t1"));
    }
}
