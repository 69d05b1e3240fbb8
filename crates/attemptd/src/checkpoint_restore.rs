//! Restore-to-checkpoint decision table.
//!
//! A restore rewinds the attempt to the moment a given process started: every
//! later process is deleted from history and, optionally, each worktree is
//! reset to the HEAD it had back then. This module computes what would be
//! lost and whether the confirm button may be pressed; it never touches git.

use serde::{Deserialize, Serialize};

use attempt_core::types::{
    ExecutionProcess, ExecutionProcessId, ExecutionProcessRepoState, ExecutionProcessRunReason,
    RepoBranchStatus, RepoId, WorkspaceId,
};
use attempt_git::error::GitOpsError;
use attempt_git::service::{BranchStatusSource, ProcessLogSource};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LaterProcesses {
    pub coding_agent: usize,
    pub setup_script: usize,
    pub cleanup_script: usize,
    pub ids: Vec<ExecutionProcessId>,
}

impl LaterProcesses {
    pub fn total(&self) -> usize {
        self.coding_agent + self.setup_script + self.cleanup_script
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Processes in visible history after `target`. Empty when the target is not
/// part of that history.
pub fn later_processes(
    processes: &[ExecutionProcess],
    target: &ExecutionProcessId,
) -> LaterProcesses {
    let history = processes
        .iter()
        .filter(|process| process.is_in_history())
        .collect::<Vec<_>>();

    let Some(index) = history.iter().position(|process| &process.id == target) else {
        return LaterProcesses::default();
    };

    let mut later = LaterProcesses::default();
    for process in &history[index + 1..] {
        match process.run_reason {
            ExecutionProcessRunReason::CodingAgent => later.coding_agent += 1,
            ExecutionProcessRunReason::SetupScript => later.setup_script += 1,
            ExecutionProcessRunReason::CleanupScript => later.cleanup_script += 1,
            ExecutionProcessRunReason::DevServer => continue,
        }
        later.ids.push(process.id.clone());
    }
    later
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCheckpoint {
    pub repo_id: RepoId,
    pub repo_name: String,
    /// HEAD recorded when the target process started.
    pub checkpoint: Option<String>,
    pub head_oid: Option<String>,
    pub dirty: bool,
    pub uncommitted: usize,
    pub untracked: usize,
}

impl RepoCheckpoint {
    /// Repositories without a recorded checkpoint only need a reset when dirty.
    pub fn needs_reset(&self) -> bool {
        let moved = self
            .checkpoint
            .as_ref()
            .is_some_and(|checkpoint| Some(checkpoint) != self.head_oid.as_ref());
        moved || self.dirty
    }
}

/// Joins live statuses with the checkpoints recorded for one process, in
/// status order.
pub fn build_repo_checkpoints(
    statuses: &[RepoBranchStatus],
    states: &[ExecutionProcessRepoState],
) -> Vec<RepoCheckpoint> {
    statuses
        .iter()
        .map(|repo| {
            let checkpoint = states
                .iter()
                .find(|state| state.repo_id == repo.repo_id)
                .and_then(|state| state.before_head_commit.clone());
            RepoCheckpoint {
                repo_id: repo.repo_id.clone(),
                repo_name: repo.repo_name.clone(),
                checkpoint,
                head_oid: repo.status.head_oid.clone(),
                dirty: repo.status.is_dirty(),
                uncommitted: repo.status.uncommitted_count.unwrap_or(0),
                untracked: repo.status.untracked_count.unwrap_or(0),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckpointAssessment {
    pub repos: Vec<RepoCheckpoint>,
    pub any_dirty: bool,
    pub total_uncommitted: usize,
    pub total_untracked: usize,
    pub need_git_reset: bool,
    pub can_git_reset: bool,
    pub has_risk: bool,
}

impl CheckpointAssessment {
    pub fn assess(repos: Vec<RepoCheckpoint>) -> Self {
        let any_dirty = repos.iter().any(|repo| repo.dirty);
        let need_git_reset = repos.iter().any(RepoCheckpoint::needs_reset);
        Self {
            any_dirty,
            total_uncommitted: repos.iter().map(|repo| repo.uncommitted).sum(),
            total_untracked: repos.iter().map(|repo| repo.untracked).sum(),
            need_git_reset,
            can_git_reset: need_git_reset && !any_dirty,
            has_risk: any_dirty,
            repos,
        }
    }

    /// Reset is wanted but would discard local work.
    pub fn reset_requires_force(&self) -> bool {
        self.need_git_reset && !self.can_git_reset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RestoreControls {
    pub acknowledge_uncommitted: bool,
    pub worktree_reset_on: bool,
    pub force_reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RestoreDecision {
    Confirmed {
        perform_git_reset: bool,
        force_when_dirty: bool,
    },
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSession {
    pub target: ExecutionProcessId,
    pub loading: bool,
    pub assessment: CheckpointAssessment,
    pub later: LaterProcesses,
    pub controls: RestoreControls,
}

impl RestoreSession {
    /// Session shown while checkpoint data is still being fetched.
    pub fn loading(target: ExecutionProcessId, initial_worktree_reset: bool) -> Self {
        Self {
            target,
            loading: true,
            assessment: CheckpointAssessment::default(),
            later: LaterProcesses::default(),
            controls: RestoreControls {
                worktree_reset_on: initial_worktree_reset,
                ..RestoreControls::default()
            },
        }
    }

    pub fn finish_loading(&mut self, assessment: CheckpointAssessment, later: LaterProcesses) {
        tracing::debug!(
            target = %self.target,
            need_git_reset = assessment.need_git_reset,
            can_git_reset = assessment.can_git_reset,
            any_dirty = assessment.any_dirty,
            later = later.total(),
            "restore checkpoint assessed"
        );
        self.assessment = assessment;
        self.later = later;
        self.loading = false;
    }

    pub fn set_acknowledge_uncommitted(&mut self, value: bool) {
        self.controls.acknowledge_uncommitted = value;
    }

    /// Returns whether the toggle was applied. Without force, a reset that is
    /// not free can be switched off but not back on.
    pub fn set_worktree_reset(&mut self, value: bool) -> bool {
        if value && !self.controls.force_reset && !self.assessment.can_git_reset {
            return false;
        }
        self.controls.worktree_reset_on = value;
        true
    }

    pub fn set_force_reset(&mut self, value: bool) {
        self.controls.force_reset = value;
        if value {
            self.controls.worktree_reset_on = true;
        }
    }

    pub fn is_confirm_disabled(&self) -> bool {
        let assessment = &self.assessment;
        let controls = &self.controls;
        self.loading
            || (assessment.any_dirty && !controls.acknowledge_uncommitted)
            || (assessment.has_risk
                && controls.worktree_reset_on
                && assessment.need_git_reset
                && !controls.force_reset)
    }

    pub fn confirm(&self) -> Option<RestoreDecision> {
        if self.is_confirm_disabled() {
            return None;
        }
        Some(RestoreDecision::Confirmed {
            perform_git_reset: self.controls.worktree_reset_on,
            force_when_dirty: self.controls.force_reset,
        })
    }

    pub fn cancel(&self) -> RestoreDecision {
        RestoreDecision::Canceled
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreLoadError {
    #[error("failed to list processes for workspace {workspace}: {source}")]
    Processes {
        workspace: WorkspaceId,
        #[source]
        source: GitOpsError,
    },
    #[error("process {process} is not part of workspace {workspace}")]
    TargetNotFound {
        workspace: WorkspaceId,
        process: ExecutionProcessId,
    },
    #[error("process {process} cannot be restored to (dropped: {dropped}, run reason: {run_reason})")]
    TargetNotInHistory {
        process: ExecutionProcessId,
        dropped: bool,
        run_reason: ExecutionProcessRunReason,
    },
    #[error("failed to load checkpoints for process {process}: {source}")]
    Checkpoints {
        process: ExecutionProcessId,
        #[source]
        source: GitOpsError,
    },
    #[error("failed to read branch status for workspace {workspace}: {source}")]
    Statuses {
        workspace: WorkspaceId,
        #[source]
        source: GitOpsError,
    },
}

/// Fetches process history, checkpoints and live statuses, then finishes
/// loading `session`.
pub async fn load_restore_inputs<L, S>(
    logs: &L,
    statuses: &S,
    workspace: &WorkspaceId,
    session: &mut RestoreSession,
) -> Result<(), RestoreLoadError>
where
    L: ProcessLogSource + ?Sized,
    S: BranchStatusSource + ?Sized,
{
    let processes = logs
        .execution_processes(workspace)
        .await
        .map_err(|source| RestoreLoadError::Processes {
            workspace: workspace.clone(),
            source,
        })?;
    match processes.iter().find(|process| process.id == session.target) {
        None => {
            return Err(RestoreLoadError::TargetNotFound {
                workspace: workspace.clone(),
                process: session.target.clone(),
            })
        }
        Some(target) if !target.is_in_history() => {
            return Err(RestoreLoadError::TargetNotInHistory {
                process: session.target.clone(),
                dropped: target.dropped,
                run_reason: target.run_reason,
            })
        }
        Some(_) => {}
    }

    let states = logs
        .repo_states(&session.target)
        .await
        .map_err(|source| RestoreLoadError::Checkpoints {
            process: session.target.clone(),
            source,
        })?;
    let live = statuses
        .branch_status(workspace)
        .await
        .map_err(|source| RestoreLoadError::Statuses {
            workspace: workspace.clone(),
            source,
        })?;

    let assessment = CheckpointAssessment::assess(build_repo_checkpoints(&live, &states));
    let later = later_processes(&processes, &session.target);
    session.finish_loading(assessment, later);
    Ok(())
}
