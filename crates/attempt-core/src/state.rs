//! Lifecycle states shared by the gate, conflict and orchestrator engines.

use serde::{Deserialize, Serialize};

/// User-triggerable git actions for a repository binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitActionKind {
    Merge,
    Push,
    CreatePr,
    Rebase,
    ChangeTargetBranch,
    AbortConflicts,
}

impl GitActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GitActionKind::Merge => "merge",
            GitActionKind::Push => "push",
            GitActionKind::CreatePr => "create_pr",
            GitActionKind::Rebase => "rebase",
            GitActionKind::ChangeTargetBranch => "change_target_branch",
            GitActionKind::AbortConflicts => "abort_conflicts",
        }
    }

    /// Push and create-PR share one control and one pending flag.
    pub fn pending_slot(self) -> GitActionKind {
        match self {
            GitActionKind::CreatePr => GitActionKind::Push,
            other => other,
        }
    }
}

impl std::fmt::Display for GitActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-state label lifecycle of an action control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    #[default]
    Idle,
    InProgress,
    Succeeded,
}

impl ActionPhase {
    /// In-flight wins over a lingering success pulse.
    pub fn resolve(in_progress: bool, success_pulse: bool) -> Self {
        if in_progress {
            ActionPhase::InProgress
        } else if success_pulse {
            ActionPhase::Succeeded
        } else {
            ActionPhase::Idle
        }
    }
}

/// Conflict lifecycle of one repository binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictPhase {
    #[default]
    Clean,
    Conflicted,
    Aborting,
}

impl std::fmt::Display for ConflictPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ConflictPhase::Clean => "CLEAN",
            ConflictPhase::Conflicted => "CONFLICTED",
            ConflictPhase::Aborting => "ABORTING",
        };
        f.write_str(tag)
    }
}

impl ConflictPhase {
    pub fn is_clean(&self) -> bool {
        matches!(self, ConflictPhase::Clean)
    }

    /// Conflicted or aborting; the conflict file list is still relevant.
    pub fn has_conflict(&self) -> bool {
        !self.is_clean()
    }
}
