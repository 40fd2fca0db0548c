//! Executor interface (§6, external collaborator)
//!
//! Commands are structured (binary, arguments, stdin, timeout) — never
//! raw shell strings inside the core. The concrete process runner lives in
//! `warden-exec`; this module defines only the trait and wire types the
//! Virtual Store depends on.

use crate::validator::CancellationToken;
use std::time::Duration;

/// A structured command, never a raw shell string.
#[derive(Debug, Clone)]
pub struct Command {
    pub binary: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub working_dir: Option<String>,
}

impl Command {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            stdin: None,
            timeout: Duration::from_secs(30),
            working_dir: None,
        }
    }
}

/// Outcome of running one command.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Cooperative cancellation context passed to long-running operations
/// (§5: "executor commands; must honour cancellation contexts").
pub trait CancellableContext: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancellableContext for crate::validator::CancellationToken {
    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

/// What a given executor implementation is able to run — surfaced so the
/// Virtual Store can refuse actions the configured executor can't satisfy.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub supports_stdin: bool,
    pub supports_cancellation: bool,
    pub allowed_binaries: Option<Vec<String>>,
}

/// External collaborator: runs structured commands. Implemented
/// concretely by `warden-exec`.
pub trait Executor: Send + Sync {
    fn execute(&self, ctx: &dyn CancellableContext, command: &Command) -> Result<ExecutionResult, String>;
    fn validate(&self, command: &Command) -> Result<(), String>;
    fn capabilities(&self) -> Capabilities;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_result_success() {
        let r = ExecutionResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(r.success());
    }

    #[test]
    fn test_cancellation_token_as_context() {
        let token = CancellationToken::new();
        let ctx: &dyn CancellableContext = &token;
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
