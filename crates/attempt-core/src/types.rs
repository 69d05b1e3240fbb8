//! Core data model for task attempts, their repositories and process history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub String);

impl RepoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionProcessId(pub String);

impl ExecutionProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ExecutionProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExecutionProcessId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A repository bound to a workspace, with the branch its changes land on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoBinding {
    pub workspace_id: WorkspaceId,
    pub repo_id: RepoId,
    pub repo_name: String,
    pub target_branch: String,
}

/// One execution of a task against its bound repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub branch: String,
    #[serde(default)]
    pub repos: Vec<RepoBinding>,
    pub created_at: DateTime<Utc>,
}

/// Git operation that left a worktree in a conflicted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOp {
    Rebase,
    Merge,
    CherryPick,
    Revert,
}

impl ConflictOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictOp::Rebase => "rebase",
            ConflictOp::Merge => "merge",
            ConflictOp::CherryPick => "cherry_pick",
            ConflictOp::Revert => "revert",
        }
    }

    /// Human readable name, e.g. for banner headings.
    pub fn display_name(self) -> &'static str {
        match self {
            ConflictOp::Rebase => "Rebase",
            ConflictOp::Merge => "Merge",
            ConflictOp::CherryPick => "Cherry-pick",
            ConflictOp::Revert => "Revert",
        }
    }
}

impl std::str::FromStr for ConflictOp {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "rebase" => Ok(ConflictOp::Rebase),
            "merge" => Ok(ConflictOp::Merge),
            "cherry_pick" => Ok(ConflictOp::CherryPick),
            "revert" => Ok(ConflictOp::Revert),
            other => Err(format!(
                "invalid conflict op '{other}'. valid values: rebase, merge, cherry_pick, revert"
            )),
        }
    }
}

impl std::fmt::Display for ConflictOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Open,
    Merged,
    Closed,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    pub status: MergeStatus,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMerge {
    pub merge_commit: String,
    pub target_branch_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrMerge {
    pub target_branch_name: String,
    pub pr_info: PullRequestInfo,
    pub created_at: DateTime<Utc>,
}

/// A change that landed (or is proposed to land) on the target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Merge {
    Direct(DirectMerge),
    Pr(PrMerge),
}

impl Merge {
    pub fn pull_request(&self) -> Option<&PullRequestInfo> {
        match self {
            Merge::Direct(_) => None,
            Merge::Pr(pr) => Some(&pr.pr_info),
        }
    }

    /// True when this record represents a change that reached the target branch.
    pub fn is_landed(&self) -> bool {
        match self {
            Merge::Direct(_) => true,
            Merge::Pr(pr) => pr.pr_info.status == MergeStatus::Merged,
        }
    }
}

/// Git facts for one repository binding, as reported by the status service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BranchStatus {
    pub target_branch_name: String,
    #[serde(default)]
    pub head_oid: Option<String>,
    #[serde(default)]
    pub commits_ahead: Option<usize>,
    #[serde(default)]
    pub commits_behind: Option<usize>,
    #[serde(default)]
    pub remote_commits_ahead: Option<usize>,
    #[serde(default)]
    pub remote_commits_behind: Option<usize>,
    #[serde(default)]
    pub has_uncommitted_changes: Option<bool>,
    #[serde(default)]
    pub uncommitted_count: Option<usize>,
    #[serde(default)]
    pub untracked_count: Option<usize>,
    #[serde(default)]
    pub conflicted_files: Vec<String>,
    #[serde(default)]
    pub conflict_op: Option<ConflictOp>,
    #[serde(default)]
    pub is_rebase_in_progress: bool,
    /// Most recent first.
    #[serde(default)]
    pub merges: Vec<Merge>,
}

impl BranchStatus {
    pub fn commits_ahead_or_zero(&self) -> usize {
        self.commits_ahead.unwrap_or(0)
    }

    pub fn remote_commits_ahead_or_zero(&self) -> usize {
        self.remote_commits_ahead.unwrap_or(0)
    }

    pub fn is_dirty(&self) -> bool {
        self.has_uncommitted_changes.unwrap_or(false)
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflict_op.is_some() || !self.conflicted_files.is_empty()
    }

    /// `conflict_op` is set iff there are conflicted files or a rebase is in progress.
    pub fn conflict_invariant_holds(&self) -> bool {
        let conflicted = !self.conflicted_files.is_empty() || self.is_rebase_in_progress;
        conflicted == self.conflict_op.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoBranchStatus {
    pub repo_id: RepoId,
    pub repo_name: String,
    #[serde(flatten)]
    pub status: BranchStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProcessRunReason {
    SetupScript,
    CleanupScript,
    CodingAgent,
    DevServer,
}

impl ExecutionProcessRunReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionProcessRunReason::SetupScript => "setupscript",
            ExecutionProcessRunReason::CleanupScript => "cleanupscript",
            ExecutionProcessRunReason::CodingAgent => "codingagent",
            ExecutionProcessRunReason::DevServer => "devserver",
        }
    }

    /// Whether runs of this kind appear in the attempt's log history.
    pub fn shown_in_logs(self) -> bool {
        !matches!(self, ExecutionProcessRunReason::DevServer)
    }
}

impl std::fmt::Display for ExecutionProcessRunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionProcessStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Killed,
}

/// One logged run belonging to a workspace. Lists are ordered by creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProcess {
    pub id: ExecutionProcessId,
    pub workspace_id: WorkspaceId,
    pub run_reason: ExecutionProcessRunReason,
    #[serde(default)]
    pub status: ExecutionProcessStatus,
    /// Excluded from history, e.g. by an earlier restore.
    #[serde(default)]
    pub dropped: bool,
    pub created_at: DateTime<Utc>,
}

impl ExecutionProcess {
    pub fn is_in_history(&self) -> bool {
        !self.dropped && self.run_reason.shown_in_logs()
    }
}

/// True while any process in the attempt's visible history is still running.
pub fn is_attempt_running(processes: &[ExecutionProcess]) -> bool {
    processes
        .iter()
        .any(|process| process.is_in_history() && process.status == ExecutionProcessStatus::Running)
}

/// HEAD of one repository at the moment a process began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProcessRepoState {
    pub execution_process_id: ExecutionProcessId,
    pub repo_id: RepoId,
    #[serde(default)]
    pub before_head_commit: Option<String>,
    #[serde(default)]
    pub after_head_commit: Option<String>,
}
