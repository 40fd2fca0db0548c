//! Validator Pipeline (§4.4)
//!
//! A registry maps `ActionType` to an ordered list of validators. Each
//! validator declares whether it claims a type, a priority (lower runs
//! earlier), and a `validate` call returning a `ValidationResult`. Running
//! the pipeline for a request short-circuits once a validator returns
//! `verified=false` with confidence ≥ 0.8 (P6).

use crate::action::{ActionPayload, ActionRequest, ActionResult, ActionType};
use crate::bridge::ExternalPredicateBridge;
use crate::error::ValidationError;
use crate::term::Term;
use crate::types::Timestamp;
use parking_lot::RwLock;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation signal shared across one pipeline run.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a single validator's check.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub verified: bool,
    pub confidence: f64,
    pub method: String,
    pub error: Option<String>,
    pub details: String,
    pub duration: Duration,
    pub timestamp: Timestamp,
}

impl ValidationResult {
    fn now(verified: bool, confidence: f64, method: &str, details: impl Into<String>, start: Instant) -> Self {
        Self {
            verified,
            confidence,
            method: method.to_string(),
            error: None,
            details: details.into(),
            duration: start.elapsed(),
            timestamp: crate::types::now(),
        }
    }

    fn cancelled() -> Self {
        Self {
            verified: false,
            confidence: 0.0,
            method: "cancelled".to_string(),
            error: Some("validation cancelled".to_string()),
            details: String::new(),
            duration: Duration::ZERO,
            timestamp: crate::types::now(),
        }
    }

    fn skipped() -> Self {
        Self {
            verified: true,
            confidence: 0.0,
            method: "skipped".to_string(),
            error: None,
            details: "no validator claims this action type".to_string(),
            duration: Duration::ZERO,
            timestamp: crate::types::now(),
        }
    }

    /// Whether this result should short-circuit the remaining pipeline.
    pub fn is_high_confidence_failure(&self) -> bool {
        !self.verified && self.confidence >= 0.8
    }
}

/// A post-action validator.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;
    fn can_validate(&self, action_type: ActionType) -> bool;
    fn priority(&self) -> i32;
    fn validate(&self, request: &ActionRequest, result: &ActionResult) -> ValidationResult;
}

/// Ordered registry of validators, reader-writer locked (§5). A per-type
/// cache avoids re-filtering+re-sorting on every run; invalidated on
/// `register`.
pub struct ValidatorRegistry {
    validators: RwLock<Vec<Arc<dyn Validator>>>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self {
            validators: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, validator: Arc<dyn Validator>) {
        let mut validators = self.validators.write();
        validators.push(validator);
        validators.sort_by_key(|v| v.priority());
    }

    fn applicable_for(&self, action_type: ActionType) -> Vec<Arc<dyn Validator>> {
        self.validators
            .read()
            .iter()
            .filter(|v| v.can_validate(action_type))
            .cloned()
            .collect()
    }

    /// Run the pipeline for one request/result pair, honoring
    /// cancellation and the short-circuit rule (P6).
    pub fn run(
        &self,
        request: &ActionRequest,
        result: &ActionResult,
        cancellation: &CancellationToken,
    ) -> Vec<ValidationResult> {
        let applicable = self.applicable_for(request.action_type);
        if applicable.is_empty() {
            return vec![ValidationResult::skipped()];
        }

        let mut results = Vec::new();
        for validator in applicable {
            if cancellation.is_cancelled() {
                results.push(ValidationResult::cancelled());
                break;
            }
            let outcome = validator.validate(request, result);
            let short_circuit = outcome.is_high_confidence_failure();
            results.push(outcome);
            if short_circuit {
                break;
            }
        }
        results
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Priority 10: readback target, require regular file; SHA-256-compare
/// against `payload.content` when present (S3).
pub struct FileWriteValidator;

impl Validator for FileWriteValidator {
    fn name(&self) -> &str {
        "file_write"
    }

    fn can_validate(&self, action_type: ActionType) -> bool {
        action_type == ActionType::WriteFile
    }

    fn priority(&self) -> i32 {
        10
    }

    fn validate(&self, request: &ActionRequest, _result: &ActionResult) -> ValidationResult {
        let start = Instant::now();
        let path = Path::new(&request.target);

        if !path.is_file() {
            return ValidationResult::now(false, 1.0, "existence", "target is not a regular file", start);
        }

        if let ActionPayload::WriteFile { content } = &request.payload {
            let expected = sha256_hex(content);
            match std::fs::read(path) {
                Ok(actual_bytes) => {
                    let actual = sha256_hex(&actual_bytes);
                    if actual == expected {
                        ValidationResult::now(
                            true,
                            1.0,
                            "hash",
                            format!("sha256 matched ({}…)", &actual[..8]),
                            start,
                        )
                    } else {
                        ValidationResult::now(
                            false,
                            1.0,
                            "hash",
                            format!(
                                "sha256 mismatch: expected {}… actual {}…",
                                &expected[..8],
                                &actual[..8]
                            ),
                            start,
                        )
                    }
                }
                Err(e) => ValidationResult::now(false, 1.0, "hash", format!("readback failed: {e}"), start),
            }
        } else {
            ValidationResult::now(true, 0.6, "existence", "file exists", start)
        }
    }
}

/// Priority 10: readback must not contain `payload.old` and must contain
/// `payload.new`.
pub struct FileEditValidator;

impl Validator for FileEditValidator {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn can_validate(&self, action_type: ActionType) -> bool {
        action_type == ActionType::EditFile
    }

    fn priority(&self) -> i32 {
        10
    }

    fn validate(&self, request: &ActionRequest, _result: &ActionResult) -> ValidationResult {
        let start = Instant::now();
        let ActionPayload::EditFile { old, new } = &request.payload else {
            return ValidationResult::now(false, 0.9, "content_check", "malformed payload", start);
        };
        match std::fs::read_to_string(&request.target) {
            Ok(text) => {
                if text.contains(old.as_str()) {
                    ValidationResult::now(false, 0.9, "content_check", "old content still present", start)
                } else if !text.contains(new.as_str()) {
                    ValidationResult::now(false, 0.9, "content_check", "new content missing", start)
                } else {
                    ValidationResult::now(true, 0.9, "content_check", "edit applied", start)
                }
            }
            Err(e) => ValidationResult::now(false, 0.9, "content_check", format!("readback failed: {e}"), start),
        }
    }
}

/// Priority 10: `stat` must fail with not-found.
pub struct FileDeleteValidator;

impl Validator for FileDeleteValidator {
    fn name(&self) -> &str {
        "file_delete"
    }

    fn can_validate(&self, action_type: ActionType) -> bool {
        action_type == ActionType::DeleteFile
    }

    fn priority(&self) -> i32 {
        10
    }

    fn validate(&self, request: &ActionRequest, _result: &ActionResult) -> ValidationResult {
        let start = Instant::now();
        if Path::new(&request.target).exists() {
            ValidationResult::now(false, 1.0, "existence", "target still exists", start)
        } else {
            ValidationResult::now(true, 1.0, "existence", "target absent", start)
        }
    }
}

/// Failure-pattern table scanned by Build/Test/Execution validators.
fn failure_patterns() -> &'static [&'static str] {
    &[
        "panic:",
        "FAIL\t",
        "npm ERR!",
        "Traceback",
        "CONFLICT",
        "error:",
        "error[E",
    ]
}

fn scan_output_for_failures(output: &str) -> Option<&'static str> {
    failure_patterns().iter().find(|p| output.contains(**p)).copied()
}

macro_rules! output_scan_validator {
    ($name:ident, $display:literal, $action:expr, $priority:expr) => {
        pub struct $name;

        impl Validator for $name {
            fn name(&self) -> &str {
                $display
            }
            fn can_validate(&self, action_type: ActionType) -> bool {
                action_type == $action
            }
            fn priority(&self) -> i32 {
                $priority
            }
            fn validate(&self, _request: &ActionRequest, result: &ActionResult) -> ValidationResult {
                let start = Instant::now();
                match scan_output_for_failures(&result.output) {
                    Some(pattern) => ValidationResult::now(
                        false,
                        0.85,
                        concat!($display, "_output_scan"),
                        format!("matched failure pattern '{pattern}'"),
                        start,
                    ),
                    None => ValidationResult::now(true, 0.7, concat!($display, "_output_scan"), "no failure pattern matched", start),
                }
            }
        }
    };
}

output_scan_validator!(BuildValidator, "build", ActionType::RunBuild, 8);
output_scan_validator!(TestValidator, "test", ActionType::RunTests, 9);
output_scan_validator!(ExecutionValidator, "execution", ActionType::ExecCmd, 10);

/// Priority 20: parse the resulting file to confirm syntax.
pub struct SyntaxValidator {
    /// language matcher — currently Rust-only via tree-sitter-rust;
    /// non-`.rs` targets are skipped (verified with low confidence).
    extension: &'static str,
}

impl SyntaxValidator {
    pub fn rust() -> Self {
        Self { extension: "rs" }
    }
}

impl Validator for SyntaxValidator {
    fn name(&self) -> &str {
        "syntax"
    }

    fn can_validate(&self, action_type: ActionType) -> bool {
        matches!(action_type, ActionType::WriteFile | ActionType::EditFile)
    }

    fn priority(&self) -> i32 {
        20
    }

    fn validate(&self, request: &ActionRequest, _result: &ActionResult) -> ValidationResult {
        let start = Instant::now();
        if !request.target.ends_with(self.extension) {
            return ValidationResult::now(true, 0.3, "syntax", "non-rust target skipped", start);
        }
        let source = match std::fs::read_to_string(&request.target) {
            Ok(s) => s,
            Err(e) => return ValidationResult::now(false, 0.7, "syntax", format!("readback failed: {e}"), start),
        };

        let mut parser = tree_sitter::Parser::new();
        if parser.set_language(&tree_sitter_rust::language()).is_err() {
            return ValidationResult::now(true, 0.0, "syntax", "parser unavailable", start);
        }
        match parser.parse(&source, None) {
            Some(tree) if !tree.root_node().has_error() => {
                ValidationResult::now(true, 0.8, "syntax", "parsed without error nodes", start)
            }
            Some(_) => ValidationResult::now(false, 0.8, "syntax", "parse tree contains error nodes", start),
            None => ValidationResult::now(false, 0.8, "syntax", "parser failed to produce a tree", start),
        }
    }
}

/// Priority 15: cheap syntactic confirmation that a line-level edit left a
/// function signature in place. Purely a regex match against the target's
/// current text — no bridge or kernel access. See `CodeDomValidator` for
/// the priority-25 validator that actually re-queries the code graph.
pub struct LineEditValidator {
    symbol_pattern: Regex,
}

impl LineEditValidator {
    pub fn new() -> Self {
        Self {
            symbol_pattern: Regex::new(r"fn\s+\w+").expect("static pattern is valid"),
        }
    }
}

impl Default for LineEditValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for LineEditValidator {
    fn name(&self) -> &str {
        "line_edit"
    }

    fn can_validate(&self, action_type: ActionType) -> bool {
        matches!(
            action_type,
            ActionType::EditLines | ActionType::InsertLines | ActionType::DeleteLines
        )
    }

    fn priority(&self) -> i32 {
        15
    }

    fn validate(&self, request: &ActionRequest, _result: &ActionResult) -> ValidationResult {
        let start = Instant::now();
        match std::fs::read_to_string(&request.target) {
            Ok(text) if self.symbol_pattern.is_match(&text) => {
                ValidationResult::now(true, 0.5, "codedom_refresh", "symbol pattern still present", start)
            }
            Ok(_) => ValidationResult::now(true, 0.2, "codedom_refresh", "no symbol pattern expected here", start),
            Err(e) => ValidationResult::now(false, 0.6, "codedom_refresh", format!("readback failed: {e}"), start),
        }
    }
}

/// Priority 25: re-query the code graph through `query_knowledge_graph/3`
/// to confirm the edited target still has recorded graph edges. Runs after
/// `LineEditValidator` so a semantic check can override a passing regex
/// match; if `query_knowledge_graph` is not registered on the bridge (no
/// `CodeGraphHandler` wired in), this validator stays neutral rather than
/// failing the pipeline for a capability it cannot assume is present.
pub struct CodeDomValidator {
    bridge: Arc<ExternalPredicateBridge>,
}

impl CodeDomValidator {
    pub fn new(bridge: Arc<ExternalPredicateBridge>) -> Self {
        Self { bridge }
    }
}

impl Validator for CodeDomValidator {
    fn name(&self) -> &str {
        "code_dom"
    }

    fn can_validate(&self, action_type: ActionType) -> bool {
        matches!(
            action_type,
            ActionType::EditLines | ActionType::InsertLines | ActionType::DeleteLines
        )
    }

    fn priority(&self) -> i32 {
        25
    }

    fn validate(&self, request: &ActionRequest, _result: &ActionResult) -> ValidationResult {
        let start = Instant::now();
        if !self.bridge.is_registered("query_knowledge_graph") {
            return ValidationResult::now(true, 0.0, "code_graph_query", "code graph not wired in", start);
        }

        let rows = self
            .bridge
            .resolve("query_knowledge_graph", &[Term::string(request.target.clone())]);
        if rows.is_empty() {
            ValidationResult::now(true, 0.3, "code_graph_query", "target has no recorded graph edges", start)
        } else {
            ValidationResult::now(
                true,
                0.7,
                "code_graph_query",
                format!("target has {} recorded graph edge(s)", rows.len()),
                start,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn request(action_type: ActionType, target: &str, payload: ActionPayload) -> ActionRequest {
        ActionRequest::new("a1", action_type, target, payload, "s1")
    }

    /// S3: file-write hash validation.
    #[test]
    fn test_s3_file_write_hash_match() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello, World!").unwrap();

        let req = request(
            ActionType::WriteFile,
            file.path().to_str().unwrap(),
            ActionPayload::WriteFile {
                content: b"Hello, World!".to_vec(),
            },
        );
        let result = ActionResult::ok("wrote file");
        let v = FileWriteValidator;
        let outcome = v.validate(&req, &result);
        assert!(outcome.verified);
        assert_eq!(outcome.method, "hash");
        assert_eq!(outcome.confidence, 1.0);
    }

    #[test]
    fn test_s3_file_write_hash_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello").unwrap();

        let req = request(
            ActionType::WriteFile,
            file.path().to_str().unwrap(),
            ActionPayload::WriteFile {
                content: b"Hello, World!".to_vec(),
            },
        );
        let result = ActionResult::ok("wrote file");
        let v = FileWriteValidator;
        let outcome = v.validate(&req, &result);
        assert!(!outcome.verified);
        assert_eq!(outcome.method, "hash");
    }

    /// P6 / S5: validator short-circuit.
    #[test]
    fn test_p6_short_circuit() {
        struct Failing;
        impl Validator for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn can_validate(&self, t: ActionType) -> bool {
                t == ActionType::RunTests
            }
            fn priority(&self) -> i32 {
                10
            }
            fn validate(&self, _r: &ActionRequest, _res: &ActionResult) -> ValidationResult {
                ValidationResult::now(false, 0.95, "custom", "forced failure", Instant::now())
            }
        }
        struct NeverRuns(Arc<AtomicBool>);
        impl Validator for NeverRuns {
            fn name(&self) -> &str {
                "never_runs"
            }
            fn can_validate(&self, t: ActionType) -> bool {
                t == ActionType::RunTests
            }
            fn priority(&self) -> i32 {
                20
            }
            fn validate(&self, _r: &ActionRequest, _res: &ActionResult) -> ValidationResult {
                self.0.store(true, Ordering::SeqCst);
                ValidationResult::now(true, 1.0, "custom", "", Instant::now())
            }
        }

        let ran_second = Arc::new(AtomicBool::new(false));
        let registry = ValidatorRegistry::new();
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(NeverRuns(ran_second.clone())));

        let req = request(ActionType::RunTests, "n/a", ActionPayload::RunTests { suite: None });
        let result = ActionResult::ok("ran");
        let results = registry.run(&req, &result, &CancellationToken::new());

        assert_eq!(results.len(), 1);
        assert!(!results[0].verified);
        assert!(!ran_second.load(Ordering::SeqCst));
    }

    #[test]
    fn test_skipped_when_no_validator_claims_type() {
        let registry = ValidatorRegistry::new();
        let req = request(ActionType::Complete, "n/a", ActionPayload::Complete { summary: "done".into() });
        let result = ActionResult::ok("done");
        let results = registry.run(&req, &result, &CancellationToken::new());
        assert_eq!(results.len(), 1);
        assert!(results[0].verified);
        assert_eq!(results[0].confidence, 0.0);
    }

    #[test]
    fn test_cancellation_appends_terminal_result() {
        let registry = ValidatorRegistry::new();
        registry.register(Arc::new(FileDeleteValidator));
        let token = CancellationToken::new();
        token.cancel();

        let req = request(ActionType::DeleteFile, "/tmp/whatever", ActionPayload::DeleteFile);
        let result = ActionResult::ok("deleted");
        let results = registry.run(&req, &result, &token);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].method, "cancelled");
        assert!(!results[0].verified);
    }

    #[test]
    fn test_code_dom_validator_neutral_when_graph_unregistered() {
        let bridge = Arc::new(ExternalPredicateBridge::new());
        let v = CodeDomValidator::new(bridge);
        let req = request(ActionType::EditLines, "src/lib.rs", ActionPayload::ReadFile);
        let result = ActionResult::ok("edited");
        let outcome = v.validate(&req, &result);
        assert!(outcome.verified);
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_code_dom_validator_reports_edges_from_bridge() {
        use crate::bridge::{FnHandler, Mode};

        let bridge = Arc::new(ExternalPredicateBridge::new());
        bridge.register(
            "query_knowledge_graph",
            vec![Mode::Input, Mode::Output, Mode::Output],
            Arc::new(FnHandler(|inputs| {
                Ok(vec![vec![inputs[0].clone(), Term::string("callee"), Term::Float(1.0)]])
            })),
        );

        let v = CodeDomValidator::new(bridge);
        let req = request(ActionType::EditLines, "src/lib.rs", ActionPayload::ReadFile);
        let result = ActionResult::ok("edited");
        let outcome = v.validate(&req, &result);
        assert!(outcome.verified);
        assert_eq!(outcome.confidence, 0.7);
    }

    #[test]
    fn test_output_scan_detects_panic() {
        let v = TestValidator;
        let req = request(ActionType::RunTests, "n/a", ActionPayload::RunTests { suite: None });
        let result = ActionResult::failed("thread main panicked\npanic: boom", "nonzero exit");
        let outcome = v.validate(&req, &result);
        assert!(!outcome.verified);
    }
}
