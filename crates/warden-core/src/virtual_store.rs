//! Virtual Store (§4, router)
//!
//! Binds `ActionType` to handlers, gates execution on the Logic Kernel's
//! `permitted(ActionType, Target)` derivation, runs the Dream Engine ahead
//! of every action (not only transactional ones), executes, re-validates,
//! and asserts the result back in as new facts. A reader-writer-locked
//! `HashMap<Key, Handler>` with a `register` call, generalized here from
//! channel dispatch to action dispatch. No process-wide singleton — a
//! `VirtualStore` owns its kernel,
//! executor, and validator registry, all passed in at construction (§9).

use crate::action::{normalize_action_name, ActionPayload, ActionRequest, ActionResult, ActionType};
use crate::bridge::{ExternalPredicateBridge, FnHandler, Mode};
use crate::dream::dream;
use crate::error::{KernelError, Result, WardenError};
use crate::executor::{Command, Executor};
use crate::kernel::LogicKernel;
use crate::limits::{estimate_memory_mb, LimitsEnforcer};
use crate::term::{Fact, Term};
use crate::types::now_unix;
use crate::validator::{CancellationToken, ValidationResult, ValidatorRegistry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A narrow capability surface for collaborators that only ever need to
/// assert results and query derived facts, never the full Kernel contract
/// (§9: shards interact only through this facade).
#[derive(Clone)]
pub struct KernelFacade {
    kernel: Arc<LogicKernel>,
}

impl KernelFacade {
    pub fn new(kernel: Arc<LogicKernel>) -> Self {
        Self { kernel }
    }

    pub fn assert(&self, predicate: &str, args: Vec<Term>) -> Result<()> {
        self.kernel.assert(predicate, args)
    }

    pub fn query(&self, predicate: &str) -> Result<Vec<Fact>> {
        self.kernel.query(predicate)
    }
}

/// One recorded action outcome, appended after every validated action and
/// consulted by the `query_traces`/`query_trace_stats` external predicates.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub action_id: String,
    pub action_type: ActionType,
    pub target: String,
    pub success: bool,
    pub timestamp_unix: i64,
}

/// Registers `query_traces/5 (+,-,-,-,-)` and `query_trace_stats/4
/// (+,-,-,-)` on `bridge`, reading `traces` directly — the input position
/// is the normalized action-type name to filter by, or `"any"` for every
/// recorded action.
fn register_trace_handlers(bridge: &ExternalPredicateBridge, traces: Arc<RwLock<Vec<TraceEvent>>>) {
    fn matches(filter: &str, event: &TraceEvent) -> bool {
        filter == "any" || filter == event.action_type.normalized_name()
    }

    {
        let traces = traces.clone();
        bridge.register(
            "query_traces",
            vec![Mode::Input, Mode::Output, Mode::Output, Mode::Output, Mode::Output],
            Arc::new(FnHandler(move |inputs| {
                let filter = match &inputs[0] {
                    Term::String(s) | Term::Name(s) => s.clone(),
                    other => return Err(format!("query_traces: non-text filter {other}")),
                };
                Ok(traces
                    .read()
                    .iter()
                    .filter(|e| matches(&filter, e))
                    .map(|e| {
                        vec![
                            Term::string(filter.clone()),
                            Term::name(e.action_id.clone()),
                            Term::string(e.target.clone()),
                            Term::Boolean(e.success),
                            Term::Integer(e.timestamp_unix),
                        ]
                    })
                    .collect())
            })),
        );
    }

    bridge.register(
        "query_trace_stats",
        vec![Mode::Input, Mode::Output, Mode::Output, Mode::Output],
        Arc::new(FnHandler(move |inputs| {
            let filter = match &inputs[0] {
                Term::String(s) | Term::Name(s) => s.clone(),
                other => return Err(format!("query_trace_stats: non-text filter {other}")),
            };
            let events = traces.read();
            let matched: Vec<&TraceEvent> = events.iter().filter(|e| matches(&filter, e)).collect();
            let total = matched.len() as i64;
            let succeeded = matched.iter().filter(|e| e.success).count() as i64;
            Ok(vec![vec![
                Term::string(filter),
                Term::Integer(total),
                Term::Integer(succeeded),
                Term::Integer(total - succeeded),
            ]])
        })),
    );
}

/// Handles one `ActionType`, turning a request into an `ActionResult`.
/// Implementations may call out to the Executor for process-running
/// actions, or touch the filesystem directly for file actions.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, request: &ActionRequest, executor: &dyn Executor) -> ActionResult;
}

fn write_file_handler(request: &ActionRequest, _executor: &dyn Executor) -> ActionResult {
    let ActionPayload::WriteFile { content } = &request.payload else {
        return ActionResult::failed("", "malformed payload for write_file");
    };
    if let Some(parent) = std::path::Path::new(&request.target).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ActionResult::failed("", format!("creating parent dirs: {e}"));
            }
        }
    }
    match std::fs::write(&request.target, content) {
        Ok(()) => ActionResult::ok(format!("wrote {} bytes to {}", content.len(), request.target)),
        Err(e) => ActionResult::failed("", format!("write failed: {e}")),
    }
}

fn edit_file_handler(request: &ActionRequest, _executor: &dyn Executor) -> ActionResult {
    let ActionPayload::EditFile { old, new } = &request.payload else {
        return ActionResult::failed("", "malformed payload for edit_file");
    };
    let text = match std::fs::read_to_string(&request.target) {
        Ok(t) => t,
        Err(e) => return ActionResult::failed("", format!("readback failed: {e}")),
    };
    if !text.contains(old.as_str()) {
        return ActionResult::failed("", "old content not found in target");
    }
    let replaced = text.replacen(old.as_str(), new, 1);
    match std::fs::write(&request.target, replaced) {
        Ok(()) => ActionResult::ok("edit applied"),
        Err(e) => ActionResult::failed("", format!("write failed: {e}")),
    }
}

fn delete_file_handler(request: &ActionRequest, _executor: &dyn Executor) -> ActionResult {
    match std::fs::remove_file(&request.target) {
        Ok(()) => ActionResult::ok("deleted"),
        Err(e) => ActionResult::failed("", format!("delete failed: {e}")),
    }
}

fn read_file_handler(request: &ActionRequest, _executor: &dyn Executor) -> ActionResult {
    match std::fs::read_to_string(&request.target) {
        Ok(text) => ActionResult::ok(text),
        Err(e) => ActionResult::failed("", format!("read failed: {e}")),
    }
}

fn line_edit_handler(request: &ActionRequest, _executor: &dyn Executor) -> ActionResult {
    let text = match std::fs::read_to_string(&request.target) {
        Ok(t) => t,
        Err(e) => return ActionResult::failed("", format!("readback failed: {e}")),
    };
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();

    match &request.payload {
        ActionPayload::EditLines { start, end, new_lines } => {
            if *start > lines.len() || *end > lines.len() || start > end {
                return ActionResult::failed("", "edit_lines range out of bounds");
            }
            lines.splice(*start..*end, new_lines.iter().cloned());
        }
        ActionPayload::InsertLines { at, lines: inserted } => {
            if *at > lines.len() {
                return ActionResult::failed("", "insert_lines index out of bounds");
            }
            lines.splice(*at..*at, inserted.iter().cloned());
        }
        ActionPayload::DeleteLines { start, end } => {
            if *start > lines.len() || *end > lines.len() || start > end {
                return ActionResult::failed("", "delete_lines range out of bounds");
            }
            lines.splice(*start..*end, std::iter::empty());
        }
        _ => return ActionResult::failed("", "malformed payload for line edit"),
    }

    let mut new_text = lines.join("\n");
    new_text.push('\n');
    match std::fs::write(&request.target, new_text) {
        Ok(()) => ActionResult::ok("lines updated"),
        Err(e) => ActionResult::failed("", format!("write failed: {e}")),
    }
}

fn exec_handler(request: &ActionRequest, executor: &dyn Executor) -> ActionResult {
    let (binary, args) = match &request.payload {
        ActionPayload::ExecCmd { binary, args } => (binary.clone(), args.clone()),
        ActionPayload::RunTests { suite } => (
            "cargo".to_string(),
            match suite {
                Some(s) => vec!["test".to_string(), s.clone()],
                None => vec!["test".to_string()],
            },
        ),
        ActionPayload::RunBuild => ("cargo".to_string(), vec!["build".to_string()]),
        ActionPayload::GitOperation { op, args } => {
            let mut full = vec![op.clone()];
            full.extend(args.clone());
            ("git".to_string(), full)
        }
        _ => return ActionResult::failed("", "malformed payload for command execution"),
    };

    let mut command = Command::new(binary, args);
    command.timeout = request.timeout;
    command.working_dir = Some(request.target.clone());

    let token = CancellationToken::new();
    match executor.execute(&token, &command) {
        Ok(outcome) => {
            let mut result = if outcome.success() {
                ActionResult::ok(outcome.stdout.clone())
            } else {
                ActionResult::failed(outcome.stdout.clone(), outcome.stderr.clone())
            };
            result.exit_code = Some(outcome.exit_code);
            result
        }
        Err(e) => ActionResult::failed("", format!("executor error: {e}")),
    }
}

fn bookkeeping_handler(_request: &ActionRequest, _executor: &dyn Executor) -> ActionResult {
    ActionResult::ok("acknowledged")
}

struct FnHandler(fn(&ActionRequest, &dyn Executor) -> ActionResult);

impl ActionHandler for FnHandler {
    fn handle(&self, request: &ActionRequest, executor: &dyn Executor) -> ActionResult {
        (self.0)(request, executor)
    }
}

fn default_handlers() -> HashMap<ActionType, Arc<dyn ActionHandler>> {
    let mut map: HashMap<ActionType, Arc<dyn ActionHandler>> = HashMap::new();
    map.insert(ActionType::WriteFile, Arc::new(FnHandler(write_file_handler)));
    map.insert(ActionType::EditFile, Arc::new(FnHandler(edit_file_handler)));
    map.insert(ActionType::DeleteFile, Arc::new(FnHandler(delete_file_handler)));
    map.insert(ActionType::ReadFile, Arc::new(FnHandler(read_file_handler)));
    map.insert(ActionType::EditLines, Arc::new(FnHandler(line_edit_handler)));
    map.insert(ActionType::InsertLines, Arc::new(FnHandler(line_edit_handler)));
    map.insert(ActionType::DeleteLines, Arc::new(FnHandler(line_edit_handler)));
    map.insert(ActionType::ExecCmd, Arc::new(FnHandler(exec_handler)));
    map.insert(ActionType::RunTests, Arc::new(FnHandler(exec_handler)));
    map.insert(ActionType::RunBuild, Arc::new(FnHandler(exec_handler)));
    map.insert(ActionType::GitOperation, Arc::new(FnHandler(exec_handler)));
    map.insert(ActionType::OpenFile, Arc::new(FnHandler(bookkeeping_handler)));
    map.insert(ActionType::CloseScope, Arc::new(FnHandler(bookkeeping_handler)));
    map.insert(ActionType::Complete, Arc::new(FnHandler(bookkeeping_handler)));
    map.insert(ActionType::Escalate, Arc::new(FnHandler(bookkeeping_handler)));
    map
}

/// The outcome of routing one action end to end: the raw result plus every
/// validation round that ran against it.
#[derive(Debug, Clone)]
pub struct RoutedOutcome {
    pub result: ActionResult,
    pub validations: Vec<ValidationResult>,
}

/// Router binding `ActionType` to handlers, gated by the kernel's
/// `permitted/2` derivation and the Dream Engine's safety check.
pub struct VirtualStore {
    kernel: Arc<LogicKernel>,
    validators: Arc<ValidatorRegistry>,
    executor: Arc<dyn Executor>,
    limits: Arc<LimitsEnforcer>,
    handlers: RwLock<HashMap<ActionType, Arc<dyn ActionHandler>>>,
    /// Permission cache keyed by normalized action name (P10): caches the
    /// set of targets the kernel currently permits that action against.
    permission_cache: RwLock<HashMap<String, Vec<String>>>,
    traces: Arc<RwLock<Vec<TraceEvent>>>,
}

impl VirtualStore {
    /// Builds the router and registers `query_traces`/`query_trace_stats`
    /// onto the kernel's bridge, backed by this store's own execution
    /// trace log (§4.2: these two external predicates read the trace the
    /// Virtual Store appends to after every validated action).
    pub fn new(
        kernel: Arc<LogicKernel>,
        validators: Arc<ValidatorRegistry>,
        executor: Arc<dyn Executor>,
        limits: Arc<LimitsEnforcer>,
    ) -> Self {
        let traces: Arc<RwLock<Vec<TraceEvent>>> = Arc::new(RwLock::new(Vec::new()));
        register_trace_handlers(kernel.bridge(), traces.clone());

        Self {
            kernel,
            validators,
            executor,
            limits,
            handlers: RwLock::new(default_handlers()),
            permission_cache: RwLock::new(HashMap::new()),
            traces,
        }
    }

    pub fn register_handler(&self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().insert(action_type, handler);
    }

    pub fn facade(&self) -> KernelFacade {
        KernelFacade::new(self.kernel.clone())
    }

    /// Drop cached permission decisions; callers should invalidate after
    /// every `Evaluate` that could change `permitted/2`.
    pub fn invalidate_permission_cache(&self) {
        self.permission_cache.write().clear();
    }

    fn is_permitted(&self, action_name: &str, target: &str) -> Result<bool> {
        let key = normalize_action_name(action_name).to_string();
        {
            let cache = self.permission_cache.read();
            if let Some(targets) = cache.get(&key) {
                return Ok(targets.iter().any(|t| t == target));
            }
        }

        let facts = self.kernel.query("permitted")?;
        let targets: Vec<String> = facts
            .iter()
            .filter(|f| match f.args.first() {
                Some(Term::Name(n)) => normalize_action_name(n) == key,
                _ => false,
            })
            .filter_map(|f| match f.args.get(1) {
                Some(Term::String(s)) => Some(s.clone()),
                Some(Term::Name(n)) => Some(n.clone()),
                _ => None,
            })
            .collect();

        let allowed = targets.iter().any(|t| t == target);
        self.permission_cache.write().insert(key, targets);
        Ok(allowed)
    }

    /// Route one action through the full pipeline: permission gate, Dream
    /// simulation, handler execution, validation, fact emission.
    pub fn route(&self, request: ActionRequest, cancellation: &CancellationToken) -> Result<RoutedOutcome> {
        let action_name = request.action_type.normalized_name();

        self.limits.check_session_duration()?;
        self.limits
            .check_memory(estimate_memory_mb(self.kernel.fact_count()))?;

        if self.kernel.is_initialized() && !self.is_permitted(action_name, &request.target)? {
            return Err(KernelError::PermissionDenied {
                action: action_name.to_string(),
                target: request.target.clone(),
                reason: "no matching permitted/2 derivation".to_string(),
            }
            .into());
        }

        let dream_result = dream(
            &self.kernel,
            &request.action_id,
            request.action_type,
            &request.target,
            None,
        );
        if dream_result.unsafe_ {
            return Err(KernelError::PermissionDenied {
                action: action_name.to_string(),
                target: request.target.clone(),
                reason: dream_result
                    .reason
                    .unwrap_or_else(|| "unsafe projection".to_string()),
            }
            .into());
        }

        let handler = {
            let handlers = self.handlers.read();
            handlers.get(&request.action_type).cloned()
        };
        let result = match handler {
            Some(h) => h.handle(&request, self.executor.as_ref()),
            None => ActionResult::failed("", format!("no handler bound for action '{action_name}'")),
        };

        let validations = self.validators.run(&request, &result, cancellation);
        self.emit_result_facts(&request, &result, &validations);

        self.traces.write().push(TraceEvent {
            action_id: request.action_id.clone(),
            action_type: request.action_type,
            target: request.target.clone(),
            success: result.success,
            timestamp_unix: now_unix(),
        });

        Ok(RoutedOutcome { result, validations })
    }

    fn emit_result_facts(&self, request: &ActionRequest, result: &ActionResult, validations: &[ValidationResult]) {
        let ts = now_unix();
        let mut try_assert = |predicate: &str, args: Vec<Term>| {
            if let Err(e) = self.kernel.assert(predicate, args) {
                tracing::warn!(predicate, error = %e, "failed to assert virtual store result fact");
            }
        };

        try_assert(
            "execution_result",
            vec![
                Term::name(request.action_id.clone()),
                Term::name(request.action_type.normalized_name()),
                Term::string(request.target.clone()),
                Term::Boolean(result.success),
                Term::string(result.output.chars().take(200).collect::<String>()),
                match result.exit_code {
                    Some(code) => Term::Integer(code as i64),
                    None => Term::Integer(-1),
                },
            ],
        );

        if result.exit_code == Some(0) {
            try_assert("execution_success", vec![Term::name(request.action_id.clone())]);
        }

        for validation in validations {
            try_assert(
                "validation_method_used",
                vec![
                    Term::name(request.action_id.clone()),
                    Term::name(validation.method.clone()),
                ],
            );

            if validation.verified {
                try_assert(
                    "action_verified",
                    vec![
                        Term::name(request.action_id.clone()),
                        Term::name(request.action_type.normalized_name()),
                        Term::name(validation.method.clone()),
                        Term::Integer((validation.confidence * 100.0).round() as i64),
                        Term::Integer(ts),
                    ],
                );
            } else {
                try_assert(
                    "action_validation_failed",
                    vec![
                        Term::name(request.action_id.clone()),
                        Term::name(request.action_type.normalized_name()),
                        Term::string(validation.error.clone().unwrap_or_default()),
                        Term::string(validation.details.clone()),
                        Term::Integer(ts),
                    ],
                );
            }
        }
    }

    pub fn traces(&self) -> Vec<TraceEvent> {
        self.traces.read().clone()
    }
}
