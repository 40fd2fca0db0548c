//! Transaction Manager (§4.6) — two-phase commit over file edits
//!
//! Follows an append-only, versioned persistence discipline (never mutate
//! in place; snapshot before changing; verify after),
//! adapted from SQLite-snapshot versioning to filesystem-byte snapshotting.
//! At most one active transaction per manager; `Prepare` runs its checks
//! against a Dream shadow simulation, `Commit` applies to the filesystem
//! with byte-identical rollback on any OS failure (P7).

use crate::dream::dream;
use crate::error::TransactionError;
use crate::kernel::LogicKernel;
use crate::term::{Fact, Term};
use crate::types::now_unix;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Pending,
    Preparing,
    Ready,
    Committing,
    Committed,
    Aborted,
}

impl TxnState {
    fn name(&self) -> &'static str {
        match self {
            TxnState::Pending => "pending",
            TxnState::Preparing => "preparing",
            TxnState::Ready => "ready",
            TxnState::Committing => "committing",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
        }
    }
}

/// One edit within a transaction.
#[derive(Debug, Clone)]
pub enum EditKind {
    Modify { new_bytes: Vec<u8>, expected_old_hash: Option<String> },
    Create { bytes: Vec<u8> },
    Delete,
}

#[derive(Debug, Clone)]
pub struct Edit {
    pub path: PathBuf,
    pub kind: EditKind,
}

struct ActiveTxn {
    id: String,
    description: String,
    state: TxnState,
    edits: Vec<Edit>,
    /// Pre-Begin bytes, keyed by path; first write wins if the same path
    /// is edited twice.
    snapshots: HashMap<PathBuf, Vec<u8>>,
    /// Paths newly created by this transaction (absent before Begin).
    created: std::collections::HashSet<PathBuf>,
}

/// Manages at most one active transaction, guarded by a single
/// reader-writer lock (§5): `Prepare`/`Commit`/`Abort` are mutually
/// exclusive.
pub struct TransactionManager {
    active: RwLock<Option<ActiveTxn>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    pub fn begin(&self, id: impl Into<String>, description: impl Into<String>) -> Result<(), TransactionError> {
        let mut active = self.active.write();
        if let Some(existing) = active.as_ref() {
            return Err(TransactionError::WrongState {
                expected: "none".to_string(),
                actual: format!("active transaction '{}'", existing.id),
            });
        }
        *active = Some(ActiveTxn {
            id: id.into(),
            description: description.into(),
            state: TxnState::Pending,
            edits: Vec::new(),
            snapshots: HashMap::new(),
            created: std::collections::HashSet::new(),
        });
        Ok(())
    }

    pub fn state(&self) -> Option<TxnState> {
        self.active.read().as_ref().map(|t| t.state)
    }

    /// Allowed only in `Pending`. For Modify edits, snapshot the original
    /// bytes (first write wins for a repeated path).
    pub fn add_edit(&self, edit: Edit) -> Result<(), TransactionError> {
        let mut active = self.active.write();
        let txn = active.as_mut().ok_or(TransactionError::NotActive)?;
        if txn.state != TxnState::Pending {
            return Err(TransactionError::WrongState {
                expected: "pending".to_string(),
                actual: txn.state.name().to_string(),
            });
        }

        match &edit.kind {
            EditKind::Modify { .. } => {
                if !txn.snapshots.contains_key(&edit.path) {
                    let bytes = std::fs::read(&edit.path).unwrap_or_default();
                    txn.snapshots.insert(edit.path.clone(), bytes);
                }
            }
            EditKind::Create { .. } => {
                txn.created.insert(edit.path.clone());
            }
            EditKind::Delete => {
                if !txn.snapshots.contains_key(&edit.path) {
                    let bytes = std::fs::read(&edit.path).unwrap_or_default();
                    txn.snapshots.insert(edit.path.clone(), bytes);
                }
            }
        }

        txn.edits.push(edit);
        Ok(())
    }

    /// Move to `Preparing`; run the shadow-simulation safety checks; set
    /// final state to `Ready` or `Aborted`.
    pub fn prepare(&self, kernel: &LogicKernel) -> Result<TxnState, TransactionError> {
        let (id, edits) = {
            let mut active = self.active.write();
            let txn = active.as_mut().ok_or(TransactionError::NotActive)?;
            if txn.state != TxnState::Pending {
                return Err(TransactionError::WrongState {
                    expected: "pending".to_string(),
                    actual: txn.state.name().to_string(),
                });
            }
            txn.state = TxnState::Preparing;
            (txn.id.clone(), txn.edits.clone())
        };

        let mut safety_blocks = Vec::new();

        for (i, edit) in edits.iter().enumerate() {
            if let EditKind::Modify {
                expected_old_hash: Some(expected),
                ..
            } = &edit.kind
            {
                let current = std::fs::read(&edit.path).unwrap_or_default();
                let actual_hash = hex::encode(Sha256::digest(&current));
                if &actual_hash != expected {
                    safety_blocks.push(format!("file_modified_externally: {}", edit.path.display()));
                }
            }

            let action_id = format!("{id}-edit-{i}");
            let action_type = match edit.kind {
                EditKind::Delete => crate::action::ActionType::DeleteFile,
                _ => crate::action::ActionType::WriteFile,
            };
            let result = dream(
                kernel,
                &action_id,
                action_type,
                &edit.path.to_string_lossy(),
                None,
            );
            if result.unsafe_ {
                safety_blocks.push(
                    result
                        .reason
                        .unwrap_or_else(|| "unsafe projection".to_string()),
                );
            }
        }

        let mut active = self.active.write();
        let txn = active.as_mut().ok_or(TransactionError::NotActive)?;
        if safety_blocks.is_empty() {
            txn.state = TxnState::Ready;
        } else {
            txn.state = TxnState::Aborted;
        }
        let final_state = txn.state;
        drop(active);

        if !safety_blocks.is_empty() {
            return Err(TransactionError::SafetyBlock(safety_blocks.join("; ")));
        }
        Ok(final_state)
    }

    /// Allowed only in `Ready`. Applies edits in order; on any OS error,
    /// rolls back already-committed files from snapshots (P7) and aborts.
    /// Returns `file_written` facts to assert on success.
    pub fn commit(&self) -> Result<Vec<Fact>, TransactionError> {
        let (id, edits, snapshots, created) = {
            let mut active = self.active.write();
            let txn = active.as_mut().ok_or(TransactionError::NotActive)?;
            if txn.state != TxnState::Ready {
                return Err(TransactionError::WrongState {
                    expected: "ready".to_string(),
                    actual: txn.state.name().to_string(),
                });
            }
            txn.state = TxnState::Committing;
            (
                txn.id.clone(),
                txn.edits.clone(),
                txn.snapshots.clone(),
                txn.created.clone(),
            )
        };

        let mut committed_paths = Vec::new();
        let mut facts = Vec::new();
        let mut failure: Option<(usize, String)> = None;

        for (idx, edit) in edits.iter().enumerate() {
            let outcome = apply_edit(edit);
            match outcome {
                Ok(new_hash) => {
                    committed_paths.push(edit.path.clone());
                    if let Some(hash) = new_hash {
                        facts.push(Fact::new(
                            "file_written",
                            vec![
                                Term::string(edit.path.to_string_lossy().to_string()),
                                Term::string(hash),
                                Term::name(id.clone()),
                                Term::Integer(now_unix()),
                            ],
                        ));
                    }
                }
                Err(reason) => {
                    failure = Some((idx, reason));
                    break;
                }
            }
        }

        let mut active = self.active.write();
        let txn = active.as_mut().ok_or(TransactionError::NotActive)?;

        if let Some((index, reason)) = failure {
            for path in &committed_paths {
                rollback_path(path, &snapshots, &created);
            }
            txn.state = TxnState::Aborted;
            return Err(TransactionError::CommitFailed { index, reason });
        }

        txn.state = TxnState::Committed;
        Ok(facts)
    }

    /// Allowed from any pre-Committed state.
    pub fn abort(&self, _reason: impl Into<String>) -> Result<(), TransactionError> {
        let mut active = self.active.write();
        let txn = active.as_mut().ok_or(TransactionError::NotActive)?;
        if txn.state == TxnState::Committed {
            return Err(TransactionError::WrongState {
                expected: "pre-committed".to_string(),
                actual: "committed".to_string(),
            });
        }
        txn.state = TxnState::Aborted;
        Ok(())
    }

    /// Clear a finished (Committed/Aborted) transaction so `Begin` can run
    /// again.
    pub fn release(&self) {
        let mut active = self.active.write();
        if matches!(
            active.as_ref().map(|t| t.state),
            Some(TxnState::Committed) | Some(TxnState::Aborted)
        ) {
            *active = None;
        }
    }

    pub fn description(&self) -> Option<String> {
        self.active.read().as_ref().map(|t| t.description.clone())
    }
}

fn apply_edit(edit: &Edit) -> Result<Option<String>, String> {
    match &edit.kind {
        EditKind::Modify { new_bytes, .. } => {
            write_with_parents(&edit.path, new_bytes)?;
            Ok(Some(hex::encode(Sha256::digest(new_bytes))))
        }
        EditKind::Create { bytes } => {
            write_with_parents(&edit.path, bytes)?;
            Ok(Some(hex::encode(Sha256::digest(bytes))))
        }
        EditKind::Delete => {
            std::fs::remove_file(&edit.path).map_err(|e| e.to_string())?;
            Ok(None)
        }
    }
}

fn write_with_parents(path: &std::path::Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    std::fs::write(path, bytes).map_err(|e| e.to_string())
}

fn rollback_path(
    path: &std::path::Path,
    snapshots: &HashMap<PathBuf, Vec<u8>>,
    created: &std::collections::HashSet<PathBuf>,
) {
    if created.contains(path) {
        let _ = std::fs::remove_file(path);
    } else if let Some(bytes) = snapshots.get(path) {
        let _ = std::fs::write(path, bytes);
    }
}

/// Stamps for a transaction's current state, for emitting
/// `transaction_state(txn_id, status)` facts while open (§6).
pub fn transaction_state_fact(txn_id: &str, state: TxnState) -> Fact {
    Fact::new(
        "transaction_state",
        vec![Term::name(txn_id), Term::name(state.name())],
    )
}

pub fn plan_edit_fact(path: &str) -> Fact {
    Fact::new("plan_edit", vec![Term::string(path)])
}
