//! Seams to the services that own git execution, status and process history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use attempt_core::types::{
    ExecutionProcess, ExecutionProcessId, ExecutionProcessRepoState, RepoBranchStatus, RepoId,
    WorkspaceId,
};

use crate::error::GitOpsError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrRequest {
    pub repo_id: RepoId,
    pub target_branch: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseRequest {
    pub repo_id: RepoId,
    pub new_base_branch: String,
    pub old_base_branch: String,
}

/// Executes destructive git operations for a workspace's repositories.
///
/// Every call either succeeds (the next status refresh reflects it) or fails
/// with a message suitable for inline display.
#[async_trait]
pub trait GitOperations: Send + Sync {
    async fn merge(&self, workspace: &WorkspaceId, repo: &RepoId) -> Result<(), GitOpsError>;

    async fn push(&self, workspace: &WorkspaceId, repo: &RepoId) -> Result<(), GitOpsError>;

    /// Returns the URL of the created pull request.
    async fn create_pr(
        &self,
        workspace: &WorkspaceId,
        request: &CreatePrRequest,
    ) -> Result<String, GitOpsError>;

    async fn rebase(
        &self,
        workspace: &WorkspaceId,
        request: &RebaseRequest,
    ) -> Result<(), GitOpsError>;

    async fn change_target_branch(
        &self,
        workspace: &WorkspaceId,
        repo: &RepoId,
        new_target_branch: &str,
    ) -> Result<(), GitOpsError>;

    async fn abort_conflicts(
        &self,
        workspace: &WorkspaceId,
        repo: &RepoId,
    ) -> Result<(), GitOpsError>;
}

/// Current per-repository branch facts for a workspace.
#[async_trait]
pub trait BranchStatusSource: Send + Sync {
    async fn branch_status(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<RepoBranchStatus>, GitOpsError>;
}

/// Process history and the per-repository checkpoints recorded for it.
#[async_trait]
pub trait ProcessLogSource: Send + Sync {
    /// Ordered by creation, oldest first.
    async fn execution_processes(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<ExecutionProcess>, GitOpsError>;

    async fn repo_states(
        &self,
        process: &ExecutionProcessId,
    ) -> Result<Vec<ExecutionProcessRepoState>, GitOpsError>;
}
