//! Warden CLI — a thin command-line front end exercising the Logic Kernel,
//! Virtual Store, and Transaction Manager for manual operation and smoke
//! testing. Not a production agent host; see `warden-core` for that.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use warden_core::action::{ActionPayload, ActionRequest, ActionType};
use warden_core::bridge::ExternalPredicateBridge;
use warden_core::config::KernelConfig;
use warden_core::kernel::LogicKernel;
use warden_core::limits::{estimate_memory_mb, LimitsEnforcer};
use warden_core::schema::PredicateCategory;
use warden_core::source::{parse_source, parse_term};
use warden_core::store::{persist_shutdown_snapshot, PersistentStore, SqliteFactStore};
use warden_core::term::Fact;
use warden_core::transaction::{Edit, EditKind, TransactionManager};
use warden_core::validator::{
    BuildValidator, CancellationToken, CodeDomValidator, ExecutionValidator, FileDeleteValidator,
    FileEditValidator, FileWriteValidator, LineEditValidator, SyntaxValidator, TestValidator,
    ValidatorRegistry,
};
use warden_core::virtual_store::VirtualStore;
use warden_exec::ProcessExecutor;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Logic source file: `Decl`/fact/rule lines (§6 syntax).
    #[arg(short, long, global = true, default_value = "warden.logic")]
    program: PathBuf,

    /// Optional `KernelConfig` TOML; falls back to built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force debug-level logging regardless of `WARDEN_LOG`.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the program and evaluate once.
    Eval,
    /// Assert a ground fact, evaluate, and report the new fact count.
    Assert {
        predicate: String,
        /// Term literals in source syntax: `/name`, `"string"`, or a number.
        args: Vec<String>,
    },
    /// Print every currently-derivable fact for a predicate.
    Query {
        predicate: String,
        #[arg(long)]
        json: bool,
    },
    /// Route one action through the Virtual Store's gate/dream/execute/validate pipeline.
    Act {
        #[arg(value_enum)]
        action: CliActionType,
        target: String,
        /// JSON-encoded `ActionPayload`. Required for write/edit/exec/git
        /// actions; inferred for read/delete/build/test.
        #[arg(long)]
        payload: Option<String>,
        #[arg(long, default_value = "cli-session")]
        session: String,
    },
    /// Run a scripted two-phase-commit transaction over `path=content` edits.
    Txn {
        #[arg(required = true)]
        edits: Vec<String>,
        /// Abort instead of committing, to exercise rollback.
        #[arg(long)]
        abort: bool,
    },
    /// Report configuration and program health without mutating anything.
    Doctor,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliActionType {
    WriteFile,
    EditFile,
    DeleteFile,
    ReadFile,
    ExecCmd,
    RunTests,
    RunBuild,
    GitOperation,
}

impl From<CliActionType> for ActionType {
    fn from(value: CliActionType) -> Self {
        match value {
            CliActionType::WriteFile => ActionType::WriteFile,
            CliActionType::EditFile => ActionType::EditFile,
            CliActionType::DeleteFile => ActionType::DeleteFile,
            CliActionType::ReadFile => ActionType::ReadFile,
            CliActionType::ExecCmd => ActionType::ExecCmd,
            CliActionType::RunTests => ActionType::RunTests,
            CliActionType::RunBuild => ActionType::RunBuild,
            CliActionType::GitOperation => ActionType::GitOperation,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        warden_core::telemetry::init_verbose();
    } else {
        warden_core::telemetry::init();
    }

    let config = match &cli.config {
        Some(path) => {
            KernelConfig::from_file(path).with_context(|| format!("loading config {path:?}"))?
        }
        None => KernelConfig::default(),
    };

    match cli.command {
        Commands::Eval => cmd_eval(&cli.program, &config),
        Commands::Assert { predicate, args } => cmd_assert(&cli.program, &config, &predicate, &args),
        Commands::Query { predicate, json } => cmd_query(&cli.program, &config, &predicate, json),
        Commands::Act {
            action,
            target,
            payload,
            session,
        } => cmd_act(&cli.program, &config, action.into(), &target, payload, &session),
        Commands::Txn { edits, abort } => cmd_txn(&edits, abort),
        Commands::Doctor => cmd_doctor(&cli.program, &config),
    }
}

/// Reads the program file, builds a kernel from it, and hydrates any
/// persisted facts from the configured store. Returns the kernel alongside
/// the raw program text, which callers need again at shutdown to tell
/// persistent predicates apart from derived ones.
fn build_kernel(program: &Path, config: &KernelConfig) -> Result<(Arc<LogicKernel>, String)> {
    let text = std::fs::read_to_string(program)
        .with_context(|| format!("reading program file {program:?}"))?;

    let bridge = Arc::new(ExternalPredicateBridge::new());
    warden_core::register_default_handlers(&bridge);

    let kernel = Arc::new(LogicKernel::new(config.max_facts, config.gas_cap, bridge));
    kernel.set_schemas(text.clone());

    if let Some(store_path) = &config.store_path {
        let store = SqliteFactStore::open(store_path)
            .with_context(|| format!("opening persistent store {store_path}"))?;
        for fact in store.hydrate_persistent()? {
            // A predicate persisted in an earlier session may since have
            // become a rule head; skip it rather than fail the whole load.
            let _ = kernel.assert(&fact.predicate, fact.args);
        }
    }

    Ok((kernel, text))
}

/// Tags every live fact with its compiled schema category (Persistent,
/// Ephemeral, or Derived — the last reflecting stratification's rule-head
/// promotion) and writes the Persistent ones to the store, so an
/// `ephemeral`-declared predicate like `user_intent` never survives a
/// shutdown/boot cycle.
fn persist_if_configured(kernel: &LogicKernel, _text: &str, config: &KernelConfig) -> Result<()> {
    let Some(store_path) = &config.store_path else {
        return Ok(());
    };
    let store = SqliteFactStore::open(store_path)
        .with_context(|| format!("opening persistent store {store_path}"))?;

    let tagged: Vec<(Fact, PredicateCategory)> = kernel
        .query_all()?
        .into_iter()
        .map(|fact| {
            let category = kernel
                .category_of(&fact.predicate)
                .unwrap_or(PredicateCategory::Persistent);
            (fact, category)
        })
        .collect();

    let saved = persist_shutdown_snapshot(&store, &tagged)?;
    tracing::info!(saved, store = %store_path, "persisted facts");
    Ok(())
}

fn cmd_eval(program: &Path, config: &KernelConfig) -> Result<()> {
    let (kernel, text) = build_kernel(program, config)?;
    kernel.evaluate()?;
    persist_if_configured(&kernel, &text, config)?;
    println!(
        "{} program loaded: {} facts in the EDB",
        "ok".green().bold(),
        kernel.fact_count()
    );
    Ok(())
}

fn cmd_assert(program: &Path, config: &KernelConfig, predicate: &str, args: &[String]) -> Result<()> {
    let (kernel, text) = build_kernel(program, config)?;

    let terms = args
        .iter()
        .map(|a| parse_term(a).map_err(|e| anyhow::anyhow!(e.to_string())))
        .collect::<Result<Vec<_>>>()?;

    kernel.assert(predicate, terms)?;
    kernel.evaluate()?;
    persist_if_configured(&kernel, &text, config)?;

    println!(
        "{} asserted {predicate}/{}; {} facts in the EDB",
        "ok".green().bold(),
        args.len(),
        kernel.fact_count()
    );
    Ok(())
}

fn cmd_query(program: &Path, config: &KernelConfig, predicate: &str, json: bool) -> Result<()> {
    let (kernel, _text) = build_kernel(program, config)?;
    kernel.evaluate()?;
    let facts = kernel.query(predicate)?;

    if json {
        let rows: Vec<Vec<String>> = facts
            .iter()
            .map(|f| f.args.iter().map(|t| t.to_string()).collect())
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for fact in &facts {
            println!("{fact}");
        }
        println!("{} {} fact(s)", predicate.cyan(), facts.len());
    }
    Ok(())
}

fn default_validator_registry(bridge: Arc<ExternalPredicateBridge>) -> ValidatorRegistry {
    let registry = ValidatorRegistry::new();
    registry.register(Arc::new(FileWriteValidator));
    registry.register(Arc::new(FileEditValidator));
    registry.register(Arc::new(FileDeleteValidator));
    registry.register(Arc::new(BuildValidator));
    registry.register(Arc::new(TestValidator));
    registry.register(Arc::new(ExecutionValidator));
    registry.register(Arc::new(SyntaxValidator::rust()));
    registry.register(Arc::new(LineEditValidator::new()));
    registry.register(Arc::new(CodeDomValidator::new(bridge)));
    registry
}

fn resolve_payload(action: ActionType, payload_json: Option<String>) -> Result<ActionPayload> {
    if let Some(json) = payload_json {
        return serde_json::from_str(&json)
            .with_context(|| format!("parsing --payload as ActionPayload for {action:?}"));
    }
    Ok(match action {
        ActionType::ReadFile => ActionPayload::ReadFile,
        ActionType::DeleteFile => ActionPayload::DeleteFile,
        ActionType::RunBuild => ActionPayload::RunBuild,
        ActionType::RunTests => ActionPayload::RunTests { suite: None },
        other => bail!("action {other:?} requires --payload <json>"),
    })
}

fn cmd_act(
    program: &Path,
    config: &KernelConfig,
    action: ActionType,
    target: &str,
    payload_json: Option<String>,
    session: &str,
) -> Result<()> {
    let (kernel, text) = build_kernel(program, config)?;
    kernel.evaluate()?;

    let validators = Arc::new(default_validator_registry(kernel.bridge().clone()));
    let executor = Arc::new(ProcessExecutor::new());
    let limits = Arc::new(LimitsEnforcer::new(config.limits()));
    let virtual_store = VirtualStore::new(kernel.clone(), validators, executor, limits);

    let payload = resolve_payload(action, payload_json)?;
    let action_id = format!("{session}-{}", action.normalized_name());
    let request = ActionRequest::new(action_id, action, target, payload, session);
    let cancellation = CancellationToken::new();

    match virtual_store.route(request, &cancellation) {
        Ok(outcome) => {
            if outcome.result.success {
                println!("{} {}", "ok".green().bold(), outcome.result.output);
            } else {
                println!(
                    "{} {}",
                    "failed".red().bold(),
                    outcome.result.error.as_deref().unwrap_or("no error detail")
                );
            }
            for validation in &outcome.validations {
                println!(
                    "  {} verified={} confidence={:.2}: {}",
                    validation.method, validation.verified, validation.confidence, validation.details
                );
            }
        }
        Err(e) => println!("{} {e}", "denied".yellow().bold()),
    }

    persist_if_configured(&kernel, &text, config)?;
    Ok(())
}

fn cmd_txn(edits: &[String], abort: bool) -> Result<()> {
    let manager = TransactionManager::new();
    manager.begin("cli-txn", "warden-cli transaction demo")?;

    for raw in edits {
        let (path, content) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("edit '{raw}' must be path=content"))?;
        let path = PathBuf::from(path);
        let kind = if path.exists() {
            EditKind::Modify {
                new_bytes: content.as_bytes().to_vec(),
                expected_old_hash: None,
            }
        } else {
            EditKind::Create {
                bytes: content.as_bytes().to_vec(),
            }
        };
        manager.add_edit(Edit { path, kind })?;
    }

    if abort {
        manager.abort("user requested abort")?;
        println!("{} transaction aborted before commit", "ok".yellow().bold());
        return Ok(());
    }

    let kernel = LogicKernel::new(1_000, 500_000, Arc::new(ExternalPredicateBridge::new()));
    kernel.set_schemas("Decl dummy(Name).");

    manager.prepare(&kernel)?;
    let facts = manager.commit()?;

    println!("{} committed {} file(s)", "ok".green().bold(), facts.len());
    for fact in facts {
        println!("  {fact}");
    }
    Ok(())
}

fn cmd_doctor(program: &Path, config: &KernelConfig) -> Result<()> {
    println!("{}", "warden doctor".bold());

    print!("- program file {program:?}... ");
    match std::fs::read_to_string(program) {
        Ok(text) => match parse_source(&text) {
            Ok(items) => println!("{} ({} item(s))", "ok".green(), items.len()),
            Err(e) => println!("{} {e}", "parse error".red()),
        },
        Err(e) => println!("{} {e}", "missing".yellow()),
    }

    println!("- gas cap: {}", config.gas_cap);
    println!("- max facts: {}", config.max_facts);

    let limits = LimitsEnforcer::new(config.limits());
    let fact_count = build_kernel(program, config)
        .and_then(|(kernel, _)| {
            kernel.evaluate()?;
            Ok(kernel.fact_count())
        })
        .unwrap_or(0);
    let used_mb = estimate_memory_mb(fact_count);
    let capacity = limits.estimate_capacity(0, used_mb);
    println!(
        "- shards: 0/{} active, {} slot(s) free{}",
        config.max_shards,
        capacity.slots,
        capacity
            .reason
            .map(|r| format!(" ({r})"))
            .unwrap_or_default()
    );
    println!("- estimated memory (from {fact_count} fact(s)): {used_mb} MB / {} MB", config.max_memory_mb);
    match limits.check_session_duration() {
        Ok(()) => println!("- session timeout: {}s (ok, fresh session)", config.max_session_duration_secs),
        Err(e) => println!("- session timeout: {} {e}", "exceeded".red()),
    }

    match &config.store_path {
        Some(path) => {
            print!("- persistent store {path:?}... ");
            match SqliteFactStore::open(path) {
                Ok(store) => {
                    let count = store.hydrate_persistent()?.len();
                    println!("{} ({count} persisted fact(s))", "ok".green());
                }
                Err(e) => println!("{} {e}", "error".red()),
            }
        }
        None => println!("- persistent store: none configured (in-memory only)"),
    }

    Ok(())
}
