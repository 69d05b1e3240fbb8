//! In-memory git service that applies plausible effects to stored statuses.
//!
//! Used by tests and by the CLI demo fixtures. Failures can be queued per
//! action and calls can be held open until released.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use attempt_core::state::GitActionKind;
use attempt_core::types::{
    BranchStatus, DirectMerge, ExecutionProcess, ExecutionProcessId, ExecutionProcessRepoState,
    Merge, MergeStatus, PrMerge, PullRequestInfo, RepoBranchStatus, RepoId, WorkspaceId,
};

use crate::error::GitOpsError;
use crate::service::{
    BranchStatusSource, CreatePrRequest, GitOperations, ProcessLogSource, RebaseRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub workspace_id: WorkspaceId,
    pub repo_id: RepoId,
    pub action: GitActionKind,
}

#[derive(Debug, Default)]
struct ScriptedState {
    statuses: HashMap<WorkspaceId, Vec<RepoBranchStatus>>,
    processes: HashMap<WorkspaceId, Vec<ExecutionProcess>>,
    repo_states: HashMap<ExecutionProcessId, Vec<ExecutionProcessRepoState>>,
    failures: HashMap<GitActionKind, VecDeque<GitOpsError>>,
    holds: HashMap<GitActionKind, Arc<Notify>>,
    calls: Vec<RecordedCall>,
    next_pr_number: u64,
}

#[derive(Debug, Default)]
pub struct ScriptedGitOps {
    state: Mutex<ScriptedState>,
}

impl ScriptedGitOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_statuses(&self, workspace: &WorkspaceId, statuses: Vec<RepoBranchStatus>) {
        self.lock().statuses.insert(workspace.clone(), statuses);
    }

    pub fn set_processes(&self, workspace: &WorkspaceId, processes: Vec<ExecutionProcess>) {
        self.lock().processes.insert(workspace.clone(), processes);
    }

    pub fn set_repo_states(
        &self,
        process: &ExecutionProcessId,
        states: Vec<ExecutionProcessRepoState>,
    ) {
        self.lock().repo_states.insert(process.clone(), states);
    }

    /// The next call of `action` fails with `error`.
    pub fn fail_next(&self, action: GitActionKind, error: GitOpsError) {
        self.lock()
            .failures
            .entry(action)
            .or_default()
            .push_back(error);
    }

    /// Calls of `action` block until the returned handle is notified once per call.
    pub fn hold(&self, action: GitActionKind) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.lock().holds.insert(action, Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, action: GitActionKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.action == action)
            .count()
    }

    async fn dispatch<F>(
        &self,
        workspace: &WorkspaceId,
        repo: &RepoId,
        action: GitActionKind,
        apply: F,
    ) -> Result<(), GitOpsError>
    where
        F: FnOnce(&mut BranchStatus, &mut u64),
    {
        let hold = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                workspace_id: workspace.clone(),
                repo_id: repo.clone(),
                action,
            });
            state.holds.get(&action).cloned()
        };
        if let Some(notify) = hold {
            notify.notified().await;
        }

        let mut state = self.lock();
        if let Some(error) = state
            .failures
            .get_mut(&action)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let ScriptedState {
            statuses,
            next_pr_number,
            ..
        } = &mut *state;
        let entry = statuses
            .get_mut(workspace)
            .and_then(|repos| repos.iter_mut().find(|repo_status| &repo_status.repo_id == repo))
            .ok_or_else(|| GitOpsError::NotFound {
                what: format!("repo {repo} in workspace {workspace}"),
            })?;
        apply(&mut entry.status, next_pr_number);
        Ok(())
    }
}

#[async_trait]
impl GitOperations for ScriptedGitOps {
    async fn merge(&self, workspace: &WorkspaceId, repo: &RepoId) -> Result<(), GitOpsError> {
        self.dispatch(workspace, repo, GitActionKind::Merge, |status, _| {
            status.commits_ahead = Some(0);
            status.merges.insert(
                0,
                Merge::Direct(DirectMerge {
                    merge_commit: status.head_oid.clone().unwrap_or_default(),
                    target_branch_name: status.target_branch_name.clone(),
                    created_at: Utc::now(),
                }),
            );
        })
        .await
    }

    async fn push(&self, workspace: &WorkspaceId, repo: &RepoId) -> Result<(), GitOpsError> {
        self.dispatch(workspace, repo, GitActionKind::Push, |status, _| {
            status.remote_commits_ahead = Some(0);
        })
        .await
    }

    async fn create_pr(
        &self,
        workspace: &WorkspaceId,
        request: &CreatePrRequest,
    ) -> Result<String, GitOpsError> {
        let mut url = String::new();
        let target = request.target_branch.clone();
        self.dispatch(
            workspace,
            &request.repo_id,
            GitActionKind::CreatePr,
            |status, next_pr_number| {
                *next_pr_number += 1;
                let number = *next_pr_number;
                url = format!("https://example.invalid/pull/{number}");
                status.remote_commits_ahead = Some(0);
                status.merges.insert(
                    0,
                    Merge::Pr(PrMerge {
                        target_branch_name: target,
                        pr_info: PullRequestInfo {
                            number,
                            url: url.clone(),
                            status: MergeStatus::Open,
                            merged_at: None,
                            merge_commit_sha: None,
                        },
                        created_at: Utc::now(),
                    }),
                );
            },
        )
        .await?;
        Ok(url)
    }

    async fn rebase(
        &self,
        workspace: &WorkspaceId,
        request: &RebaseRequest,
    ) -> Result<(), GitOpsError> {
        let new_base = request.new_base_branch.clone();
        self.dispatch(
            workspace,
            &request.repo_id,
            GitActionKind::Rebase,
            |status, _| {
                status.commits_behind = Some(0);
                status.target_branch_name = new_base;
            },
        )
        .await
    }

    async fn change_target_branch(
        &self,
        workspace: &WorkspaceId,
        repo: &RepoId,
        new_target_branch: &str,
    ) -> Result<(), GitOpsError> {
        let new_target = new_target_branch.to_string();
        self.dispatch(
            workspace,
            repo,
            GitActionKind::ChangeTargetBranch,
            |status, _| {
                status.target_branch_name = new_target;
            },
        )
        .await
    }

    async fn abort_conflicts(
        &self,
        workspace: &WorkspaceId,
        repo: &RepoId,
    ) -> Result<(), GitOpsError> {
        self.dispatch(
            workspace,
            repo,
            GitActionKind::AbortConflicts,
            |status, _| {
                status.conflicted_files.clear();
                status.conflict_op = None;
                status.is_rebase_in_progress = false;
            },
        )
        .await
    }
}

#[async_trait]
impl BranchStatusSource for ScriptedGitOps {
    async fn branch_status(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<RepoBranchStatus>, GitOpsError> {
        Ok(self
            .lock()
            .statuses
            .get(workspace)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProcessLogSource for ScriptedGitOps {
    async fn execution_processes(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<ExecutionProcess>, GitOpsError> {
        Ok(self
            .lock()
            .processes
            .get(workspace)
            .cloned()
            .unwrap_or_default())
    }

    async fn repo_states(
        &self,
        process: &ExecutionProcessId,
    ) -> Result<Vec<ExecutionProcessRepoState>, GitOpsError> {
        self.lock()
            .repo_states
            .get(process)
            .cloned()
            .ok_or_else(|| GitOpsError::NotFound {
                what: format!("repo states for process {process}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptedGitOps;
    use crate::error::GitOpsError;
    use crate::service::{BranchStatusSource, CreatePrRequest, GitOperations};
    use attempt_core::state::GitActionKind;
    use attempt_core::types::{
        BranchStatus, ConflictOp, MergeStatus, RepoBranchStatus, RepoId, WorkspaceId,
    };

    fn seeded() -> (ScriptedGitOps, WorkspaceId, RepoId) {
        let ops = ScriptedGitOps::new();
        let ws = WorkspaceId::new("ws");
        let repo = RepoId::new("api");
        ops.set_statuses(
            &ws,
            vec![RepoBranchStatus {
                repo_id: repo.clone(),
                repo_name: "api".to_string(),
                status: BranchStatus {
                    target_branch_name: "main".to_string(),
                    head_oid: Some("abc123".to_string()),
                    commits_ahead: Some(2),
                    conflicted_files: vec!["a.rs".to_string()],
                    conflict_op: Some(ConflictOp::Merge),
                    ..BranchStatus::default()
                },
            }],
        );
        (ops, ws, repo)
    }

    #[tokio::test]
    async fn merge_records_call_and_lands_change() {
        let (ops, ws, repo) = seeded();
        ops.merge(&ws, &repo).await.expect("merge");

        let statuses = ops.branch_status(&ws).await.expect("status");
        assert_eq!(statuses[0].status.commits_ahead, Some(0));
        assert!(statuses[0].status.merges[0].is_landed());
        assert_eq!(ops.call_count(GitActionKind::Merge), 1);
    }

    #[tokio::test]
    async fn queued_failure_is_returned_once() {
        let (ops, ws, repo) = seeded();
        ops.fail_next(GitActionKind::Push, GitOpsError::failed("push", "rejected"));

        let err = ops.push(&ws, &repo).await.expect_err("first push fails");
        assert_eq!(err.user_message(), "rejected");
        ops.push(&ws, &repo).await.expect("second push succeeds");
        assert_eq!(ops.call_count(GitActionKind::Push), 2);
    }

    #[tokio::test]
    async fn create_pr_adds_open_pull_request_at_front() {
        let (ops, ws, repo) = seeded();
        let url = ops
            .create_pr(
                &ws,
                &CreatePrRequest {
                    repo_id: repo.clone(),
                    target_branch: "main".to_string(),
                    title: "Add endpoint".to_string(),
                    body: None,
                },
            )
            .await
            .expect("create pr");

        let statuses = ops.branch_status(&ws).await.expect("status");
        let pr = statuses[0].status.merges[0]
            .pull_request()
            .expect("pr record");
        assert_eq!(pr.status, MergeStatus::Open);
        assert_eq!(pr.url, url);
    }

    #[tokio::test]
    async fn abort_clears_conflict_fields() {
        let (ops, ws, repo) = seeded();
        ops.abort_conflicts(&ws, &repo).await.expect("abort");

        let statuses = ops.branch_status(&ws).await.expect("status");
        assert!(!statuses[0].status.has_conflicts());
        assert!(statuses[0].status.conflict_invariant_holds());
    }

    #[tokio::test]
    async fn unknown_repo_is_not_found() {
        let (ops, ws, _) = seeded();
        let err = ops
            .merge(&ws, &RepoId::new("web"))
            .await
            .expect_err("unknown repo");
        assert!(matches!(err, GitOpsError::NotFound { .. }));
    }
}
