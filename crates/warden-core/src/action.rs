//! Action Model (§4.3)
//!
//! `ActionType` is a closed enumeration of named operations. Payloads are
//! an enumerated schema per `ActionType` (writeFile: `{content}`; editFile:
//! `{old, new}`; editLines: `{start, end, new_lines}`; …) decoded by a
//! typed decoder rather than a `HashMap<String, Value>` — the re-
//! architecture guidance in §9 applied directly.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed enumeration of operations the Virtual Store can route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    WriteFile,
    EditFile,
    DeleteFile,
    ReadFile,
    ExecCmd,
    RunTests,
    RunBuild,
    EditLines,
    InsertLines,
    DeleteLines,
    OpenFile,
    CloseScope,
    Complete,
    Escalate,
    GitOperation,
}

impl ActionType {
    /// Normalized name used as the permission-cache key (`"/action"` and
    /// `"action"` are equivalent — P10).
    pub fn normalized_name(&self) -> &'static str {
        match self {
            ActionType::WriteFile => "write_file",
            ActionType::EditFile => "edit_file",
            ActionType::DeleteFile => "delete_file",
            ActionType::ReadFile => "read_file",
            ActionType::ExecCmd => "exec_cmd",
            ActionType::RunTests => "run_tests",
            ActionType::RunBuild => "run_build",
            ActionType::EditLines => "edit_lines",
            ActionType::InsertLines => "insert_lines",
            ActionType::DeleteLines => "delete_lines",
            ActionType::OpenFile => "open_file",
            ActionType::CloseScope => "close_scope",
            ActionType::Complete => "complete",
            ActionType::Escalate => "escalate",
            ActionType::GitOperation => "git_operation",
        }
    }
}

/// Normalize an action name for permission-cache lookups: strip a leading
/// `/` so `"/action"` and `"action"` hash identically (P10).
pub fn normalize_action_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

/// The enumerated payload schema per `ActionType`. Unknown keys in the
/// wire form are a decode error, not silently accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    WriteFile { content: Vec<u8> },
    EditFile { old: String, new: String },
    EditLines { start: usize, end: usize, new_lines: Vec<String> },
    InsertLines { at: usize, lines: Vec<String> },
    DeleteLines { start: usize, end: usize },
    DeleteFile,
    ReadFile,
    ExecCmd { binary: String, args: Vec<String> },
    RunTests { suite: Option<String> },
    RunBuild,
    OpenFile,
    CloseScope,
    Complete { summary: String },
    Escalate { reason: String },
    GitOperation { op: String, args: Vec<String> },
    /// No payload data needed for this action.
    Empty,
}

/// A request to perform one action against the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_id: String,
    pub action_type: ActionType,
    pub target: String,
    pub payload: ActionPayload,
    pub session_id: String,
    pub timeout: Duration,
    pub metadata: std::collections::HashMap<String, String>,
}

impl ActionRequest {
    pub fn new(
        action_id: impl Into<String>,
        action_type: ActionType,
        target: impl Into<String>,
        payload: ActionPayload,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            action_type,
            target: target.into(),
            payload,
            session_id: session_id.into(),
            timeout: Duration::from_secs(30),
            metadata: std::collections::HashMap::new(),
        }
    }
}

/// The outcome of actually performing an action (before validation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub details: std::collections::HashMap<String, String>,
    pub exit_code: Option<i32>,
    pub timestamp: Timestamp,
}

impl ActionResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            details: std::collections::HashMap::new(),
            exit_code: Some(0),
            timestamp: crate::types::now(),
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            details: std::collections::HashMap::new(),
            exit_code: None,
            timestamp: crate::types::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p10_permission_cache_equivalence() {
        assert_eq!(normalize_action_name("/write_file"), normalize_action_name("write_file"));
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = ActionPayload::WriteFile {
            content: b"Hello, World!".to_vec(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: ActionPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }
}
