//! Structured-command process runner (§6 external collaborator) plus an
//! ephemeral sandbox mirror for isolated test/build execution.
//!
//! Re-fit from an async sandbox runner to the synchronous
//! `warden_core::executor::Executor` trait: instead of awaiting
//! a `tokio::process::Command`, commands are spawned with
//! `std::process::Command` and polled against both a wall-clock timeout and
//! a `CancellableContext`, so a caller can interrupt a long-running test run
//! without tearing down the whole process.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use walkdir::WalkDir;
use warden_core::executor::{CancellableContext, Capabilities, Command, ExecutionResult, Executor};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs structured commands as real OS processes. Never interprets a
/// command string through a shell.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    allowed_binaries: Option<Vec<String>>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict execution to an allow-list of binaries (matched by name,
    /// not full path).
    pub fn with_allowed_binaries(binaries: Vec<String>) -> Self {
        Self {
            allowed_binaries: Some(binaries),
        }
    }

    fn check_allowed(&self, command: &Command) -> Result<(), String> {
        match &self.allowed_binaries {
            Some(allowed) if !allowed.iter().any(|b| b == &command.binary) => {
                Err(format!("binary not permitted: {}", command.binary))
            }
            _ => Ok(()),
        }
    }
}

impl Executor for ProcessExecutor {
    fn execute(
        &self,
        ctx: &dyn CancellableContext,
        command: &Command,
    ) -> Result<ExecutionResult, String> {
        self.validate(command)?;

        let mut child = StdCommand::new(&command.binary)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(command.working_dir.as_deref().unwrap_or("."))
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", command.binary))?;

        if let Some(input) = &command.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(input);
            }
        }

        let deadline = Instant::now() + command.timeout;
        loop {
            if ctx.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err("command cancelled before completion".to_string());
            }
            match child.try_wait() {
                Ok(Some(_status)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(format!("command timed out after {:?}", command.timeout));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(format!("failed to poll child process: {e}")),
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("failed to collect output: {e}"))?;

        tracing::debug!(binary = %command.binary, exit_code = output.status.code(), "command finished");

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn validate(&self, command: &Command) -> Result<(), String> {
        self.check_allowed(command)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_stdin: true,
            supports_cancellation: true,
            allowed_binaries: self.allowed_binaries.clone(),
        }
    }
}

/// An isolated directory tree, torn down on drop, for running build/test
/// actions without touching the caller's working tree.
#[derive(Debug)]
pub struct Sandbox {
    #[allow(dead_code)]
    temp_dir: TempDir,
    pub root_path: PathBuf,
    executor: ProcessExecutor,
}

impl Sandbox {
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("warden-sandbox-")
            .tempdir()?;

        Ok(Self {
            root_path: temp_dir.path().to_path_buf(),
            temp_dir,
            executor: ProcessExecutor::new(),
        })
    }

    /// Writes files relative to the sandbox root, creating parent
    /// directories as needed.
    pub fn prepare(&self, files: &[(PathBuf, String)]) -> std::io::Result<()> {
        for (path, content) in files {
            let full_path = self.root_path.join(path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full_path, content)?;
        }
        Ok(())
    }

    /// Copies an entire project tree into the sandbox, skipping build
    /// artifacts and VCS metadata.
    pub fn mirror_project(&self, source_root: &Path) -> std::io::Result<()> {
        for entry in WalkDir::new(source_root).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != "target" && name != ".git" && name != "node_modules"
        }) {
            let entry = entry.map_err(std::io::Error::other)?;
            let path = entry.path();
            if path.is_file() {
                let relative = path
                    .strip_prefix(source_root)
                    .expect("walked entry is under source_root");
                let dest = self.root_path.join(relative);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(path, dest)?;
            }
        }
        Ok(())
    }

    /// Runs a structured command with its working directory pinned to the
    /// sandbox root.
    pub fn run(
        &self,
        ctx: &dyn CancellableContext,
        command: &Command,
    ) -> Result<ExecutionResult, String> {
        let mut scoped = command.clone();
        scoped.working_dir = Some(self.root_path.to_string_lossy().into_owned());
        self.executor.execute(ctx, &scoped)
    }

    /// Runs the project's test suite inside the sandbox, if it is a Cargo
    /// project, and reports whether it passed.
    pub fn verify_atomic_truth(&self, ctx: &dyn CancellableContext) -> Result<bool, String> {
        if self.root_path.join("Cargo.toml").exists() {
            let command = Command::new("cargo", vec!["test".to_string(), "--quiet".to_string()]);
            let result = self.run(ctx, &command)?;
            return Ok(result.success());
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::validator::CancellationToken;

    #[test]
    fn test_process_executor_runs_echo() {
        let executor = ProcessExecutor::new();
        let token = CancellationToken::new();
        let command = Command::new("echo", vec!["hello".to_string()]);
        let result = executor.execute(&token, &command).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn test_process_executor_rejects_disallowed_binary() {
        let executor = ProcessExecutor::with_allowed_binaries(vec!["echo".to_string()]);
        let command = Command::new("rm", vec!["-rf".to_string(), "/".to_string()]);
        assert!(executor.validate(&command).is_err());
    }

    #[test]
    fn test_process_executor_honours_cancellation() {
        let executor = ProcessExecutor::new();
        let token = CancellationToken::new();
        token.cancel();
        let command = Command::new("sleep", vec!["5".to_string()]);
        let result = executor.execute(&token, &command);
        assert!(result.is_err());
    }

    #[test]
    fn test_process_executor_times_out() {
        let executor = ProcessExecutor::new();
        let token = CancellationToken::new();
        let mut command = Command::new("sleep", vec!["5".to_string()]);
        command.timeout = Duration::from_millis(50);
        let result = executor.execute(&token, &command);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("timed out"));
    }

    #[test]
    fn test_sandbox_prepare_and_run() {
        let sandbox = Sandbox::new().unwrap();
        sandbox
            .prepare(&[(PathBuf::from("hello.txt"), "hello sandbox".to_string())])
            .unwrap();
        assert!(sandbox.root_path.join("hello.txt").exists());

        let token = CancellationToken::new();
        let command = Command::new("cat", vec!["hello.txt".to_string()]);
        let result = sandbox.run(&token, &command).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello sandbox");
    }

    #[test]
    fn test_sandbox_verify_atomic_truth_false_without_cargo_project() {
        let sandbox = Sandbox::new().unwrap();
        let token = CancellationToken::new();
        assert!(!sandbox.verify_atomic_truth(&token).unwrap());
    }
}
