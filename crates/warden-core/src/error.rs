//! Error types for Warden Core
//!
//! We use `thiserror` for ergonomic error definitions with automatic
//! Display/Error implementations. Every component-specific error enum named
//! in the error handling design funnels into `WardenError` via `#[from]`, so
//! callers can propagate with `?` and match on the specific variant only
//! where they need to.

use thiserror::Error;

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Main error type for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// Schema-related errors (I1, Capacity)
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Parsing/stratification errors
    #[error("Program error: {0}")]
    Program(#[from] ProgramError),

    /// Kernel state/evaluation errors
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// Validator pipeline errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transaction manager errors
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Resource limit errors
    #[error("Limit error: {0}")]
    Limit(#[from] LimitError),

    /// Executor (external collaborator) errors. The pipeline still runs
    /// validators so the failure is recorded as a fact.
    #[error("Executor error: {0}")]
    Executor(String),

    /// Persistent store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config errors
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<WardenError>,
    },
}

/// Errors raised while declaring schema or asserting facts against it (I1).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("predicate '{0}' is not declared")]
    Unknown(String),

    #[error("predicate '{predicate}' expects arity {expected}, got {actual}")]
    ArityMismatch {
        predicate: String,
        expected: usize,
        actual: usize,
    },

    #[error("predicate '{predicate}' argument {position}: expected {expected}, got {actual}")]
    TypeMismatch {
        predicate: String,
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("EDB capacity exceeded: {current} facts, limit {limit}")]
    Capacity { current: usize, limit: usize },
}

/// Errors raised while parsing or analyzing logic source text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgramError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("stratification error: negation cycle through predicate '{0}'")]
    Stratification(String),

    #[error("mode error: atom '{atom}' leaves input position {position} unbound")]
    Mode { atom: String, position: usize },

    #[error("schema violation: {0}")]
    SchemaViolation(#[from] SchemaError),
}

/// Errors raised by the Logic Kernel's evaluation/query surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("derived-fact gas cap exceeded: {limit}")]
    GasExceeded { limit: usize },

    #[error("kernel has not been evaluated yet")]
    NotInitialized,

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("a transaction is already active: {0}")]
    TransactionAlreadyActive(String),

    #[error("permission denied for action '{action}' on '{target}': {reason}")]
    PermissionDenied {
        action: String,
        target: String,
        reason: String,
    },
}

/// Errors surfaced by the validator pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("validation failed: {0}")]
    Failed(String),

    #[error("validation cancelled")]
    Cancelled,
}

/// Errors surfaced by the two-phase-commit transaction manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("no active transaction")]
    NotActive,

    #[error("transaction is not in state '{expected}', found '{actual}'")]
    WrongState { expected: String, actual: String },

    #[error("safety block during prepare: {0}")]
    SafetyBlock(String),

    #[error("file modified externally: {0}")]
    ConcurrentModification(String),

    #[error("commit failed at edit {index}: {reason}")]
    CommitFailed { index: usize, reason: String },
}

/// Errors surfaced by the resource limits enforcer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimitError {
    #[error("memory limit exceeded: {used_mb}MB used, limit {limit_mb}MB")]
    MemoryLimitExceeded { used_mb: u64, limit_mb: u64 },

    #[error("session timeout: {elapsed_secs}s elapsed, limit {limit_secs}s")]
    SessionTimeout { elapsed_secs: u64, limit_secs: u64 },

    #[error("too many shards: {active}, limit {limit}")]
    TooManyShards { active: usize, limit: usize },
}

impl WardenError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = WardenError::from(KernelError::NotInitialized);
        let err = err.context("querying before first evaluate");
        assert!(err.to_string().contains("querying before first evaluate"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(SchemaError::Unknown("foo".into()).into());
        let result = result.context("asserting fact");
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("asserting fact"));
    }

    #[test]
    fn test_from_chain() {
        let program_err: ProgramError = SchemaError::Capacity {
            current: 10,
            limit: 10,
        }
        .into();
        let warden_err: WardenError = program_err.into();
        assert!(warden_err.to_string().contains("Program error"));
    }
}
