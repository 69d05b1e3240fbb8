//! Conflict lifecycle per repository binding: clean, conflicted, aborting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use attempt_core::config::ConflictDisplayConfig;
use attempt_core::state::ConflictPhase;
use attempt_core::types::{ConflictOp, RepoId};

use crate::branch_status::AggregatedStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictTransition {
    Unchanged,
    Entered,
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AbortRejection {
    #[error("repository is not conflicted")]
    NotConflicted,
    #[error("an abort is already pending")]
    AlreadyPending,
}

/// Held for the duration of one abort dispatch. Dropping it releases the
/// pending flag even if the dispatching future is cancelled.
#[derive(Debug)]
pub struct AbortGuard {
    pending: Arc<AtomicBool>,
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        self.pending.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct ConflictController {
    repo_id: RepoId,
    repo_name: String,
    phase: ConflictPhase,
    op: Option<ConflictOp>,
    files: Vec<String>,
    last_error: Option<String>,
    abort_pending: Arc<AtomicBool>,
}

impl ConflictController {
    pub fn new(repo_id: RepoId, repo_name: impl Into<String>) -> Self {
        Self {
            repo_id,
            repo_name: repo_name.into(),
            phase: ConflictPhase::Clean,
            op: None,
            files: Vec::new(),
            last_error: None,
            abort_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn repo_id(&self) -> &RepoId {
        &self.repo_id
    }

    /// `Aborting` only while an abort guard is alive, so a cancelled abort
    /// falls back to `Conflicted` without waiting for a refresh.
    pub fn phase(&self) -> ConflictPhase {
        match self.phase {
            ConflictPhase::Clean => ConflictPhase::Clean,
            _ if self.is_abort_pending() => ConflictPhase::Aborting,
            _ => ConflictPhase::Conflicted,
        }
    }

    pub fn op(&self) -> Option<ConflictOp> {
        self.op
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_abort_pending(&self) -> bool {
        self.abort_pending.load(Ordering::Acquire)
    }

    /// Recomputes the lifecycle from a fresh status. The refresh is
    /// authoritative: a clean report ends the conflict even mid-abort.
    pub fn observe(&mut self, status: &AggregatedStatus) -> ConflictTransition {
        self.repo_name.clone_from(&status.repo_name);
        let was_clean = self.phase.is_clean();

        if !status.has_conflicts {
            self.phase = ConflictPhase::Clean;
            self.op = None;
            self.files.clear();
            self.last_error = None;
            return if was_clean {
                ConflictTransition::Unchanged
            } else {
                ConflictTransition::Cleared
            };
        }

        self.op = status.conflict_op;
        self.files.clone_from(&status.status.conflicted_files);
        self.phase = ConflictPhase::Conflicted;

        if was_clean {
            ConflictTransition::Entered
        } else {
            ConflictTransition::Unchanged
        }
    }

    /// Claims the abort slot. The compare-exchange rejects a second request
    /// issued before the first has completed.
    pub fn try_begin_abort(&mut self) -> Result<AbortGuard, AbortRejection> {
        if self.phase.is_clean() {
            return Err(AbortRejection::NotConflicted);
        }
        self.abort_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AbortRejection::AlreadyPending)?;

        self.last_error = None;
        Ok(AbortGuard {
            pending: Arc::clone(&self.abort_pending),
        })
    }

    /// Applies the abort result. A failure keeps the file list and shows the
    /// error until the next abort attempt or a clean refresh.
    pub fn finish_abort(&mut self, guard: AbortGuard, result: Result<(), String>) {
        drop(guard);
        match result {
            Ok(()) => {
                self.phase = ConflictPhase::Clean;
                self.op = None;
                self.files.clear();
                self.last_error = None;
            }
            Err(_) if self.phase.is_clean() => {}
            Err(message) => {
                self.phase = ConflictPhase::Conflicted;
                self.last_error = Some(message);
            }
        }
    }

    pub fn snapshot(
        &self,
        resolution_instructions: Option<&str>,
        display: &ConflictDisplayConfig,
    ) -> ConflictSnapshot {
        let phase = self.phase();
        let conflicted = phase == ConflictPhase::Conflicted;
        let has_instructions = resolution_instructions.is_some_and(|text| !text.trim().is_empty());

        let total = self.files.len();
        let shown = total.min(display.max_listed_files);
        let overflow = (total > shown).then(|| display.render_overflow(shown, total));

        ConflictSnapshot {
            repo_id: self.repo_id.clone(),
            repo_name: self.repo_name.clone(),
            phase,
            op: self.op,
            op_label: self.op.map(|op| op.display_name().to_string()),
            shown_files: self.files[..shown].to_vec(),
            total_files: total,
            overflow,
            can_abort: conflicted,
            can_resolve: conflicted && has_instructions,
            error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSnapshot {
    pub repo_id: RepoId,
    pub repo_name: String,
    pub phase: ConflictPhase,
    pub op: Option<ConflictOp>,
    pub op_label: Option<String>,
    pub shown_files: Vec<String>,
    pub total_files: usize,
    pub overflow: Option<String>,
    pub can_abort: bool,
    pub can_resolve: bool,
    pub error: Option<String>,
}

/// Default prompt handed to the coding agent when the user asks it to
/// resolve the conflict without writing custom instructions.
pub fn build_resolution_instructions(
    op: Option<ConflictOp>,
    attempt_branch: &str,
    target_branch: &str,
    files: &[String],
    repo_name: Option<&str>,
) -> String {
    let op_name = op.map(ConflictOp::display_name).unwrap_or("Merge").to_lowercase();
    let location = match repo_name {
        Some(name) => format!(" in repository '{name}'"),
        None => String::new(),
    };

    let mut text = format!(
        "A {op_name} between '{attempt_branch}' and '{target_branch}'{location} stopped with conflicts.\n"
    );
    if files.is_empty() {
        text.push_str("Run `git status` to find the conflicted files.\n");
    } else {
        text.push_str("Conflicted files:\n");
        for file in files {
            text.push_str("- ");
            text.push_str(file);
            text.push('\n');
        }
    }
    text.push_str(&format!(
        "Resolve every conflict keeping the intent of both sides, stage the files, then {}.\n",
        continue_hint(op)
    ));
    text
}

fn continue_hint(op: Option<ConflictOp>) -> &'static str {
    match op {
        Some(ConflictOp::Rebase) => "run `git rebase --continue`",
        Some(ConflictOp::Merge) | None => "commit the merge",
        Some(ConflictOp::CherryPick) => "run `git cherry-pick --continue`",
        Some(ConflictOp::Revert) => "run `git revert --continue`",
    }
}
