//! Derives actionable flags from raw per-repository branch status.

use serde::{Deserialize, Serialize};

use attempt_core::types::{
    BranchStatus, ConflictOp, Merge, MergeStatus, PullRequestInfo, RepoBranchStatus, RepoId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MergeInfo {
    pub has_open_pr: bool,
    pub open_pr: Option<PullRequestInfo>,
    pub has_merged_pr: bool,
    pub merged_pr: Option<PullRequestInfo>,
    /// Any landed change: a direct merge or a merged PR.
    pub has_merged: bool,
    pub latest_merge: Option<Merge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStatus {
    pub repo_id: RepoId,
    pub repo_name: String,
    pub status: BranchStatus,
    pub has_conflicts: bool,
    pub conflict_op: Option<ConflictOp>,
    pub merge_info: MergeInfo,
}

impl AggregatedStatus {
    pub fn commits_ahead(&self) -> usize {
        self.status.commits_ahead_or_zero()
    }

    pub fn remote_commits_ahead(&self) -> usize {
        self.status.remote_commits_ahead_or_zero()
    }
}

/// Scans merge records, most recent first. The first open PR wins if the
/// service ever reports more than one.
pub fn derive_merge_info(merges: &[Merge]) -> MergeInfo {
    let pr_with_status = |wanted: MergeStatus| {
        merges
            .iter()
            .filter_map(Merge::pull_request)
            .find(|pr| pr.status == wanted)
            .cloned()
    };

    let open_pr = pr_with_status(MergeStatus::Open);
    let merged_pr = pr_with_status(MergeStatus::Merged);
    let latest_merge = merges.iter().find(|merge| merge.is_landed()).cloned();

    MergeInfo {
        has_open_pr: open_pr.is_some(),
        open_pr,
        has_merged_pr: merged_pr.is_some(),
        merged_pr,
        has_merged: latest_merge.is_some(),
        latest_merge,
    }
}

pub fn aggregate(repo: &RepoBranchStatus) -> AggregatedStatus {
    AggregatedStatus {
        repo_id: repo.repo_id.clone(),
        repo_name: repo.repo_name.clone(),
        status: repo.status.clone(),
        has_conflicts: repo.status.has_conflicts(),
        conflict_op: repo.status.conflict_op,
        merge_info: derive_merge_info(&repo.status.merges),
    }
}

/// Status of the selected repository, or of the first bound repository when
/// nothing (or a repository no longer bound) is selected.
pub fn select_repo_status<'a>(
    statuses: &'a [RepoBranchStatus],
    selected: Option<&RepoId>,
) -> Option<&'a RepoBranchStatus> {
    selected
        .and_then(|repo_id| statuses.iter().find(|status| &status.repo_id == repo_id))
        .or_else(|| statuses.first())
}

pub fn aggregate_selected(
    statuses: &[RepoBranchStatus],
    selected: Option<&RepoId>,
) -> Option<AggregatedStatus> {
    select_repo_status(statuses, selected).map(aggregate)
}

/// Order-preserving aggregation of every bound repository.
pub fn aggregate_all(statuses: &[RepoBranchStatus]) -> Vec<AggregatedStatus> {
    statuses.iter().map(aggregate).collect()
}

/// Repositories currently conflicted, in binding order.
pub fn conflicted_repos(statuses: &[RepoBranchStatus]) -> Vec<AggregatedStatus> {
    statuses
        .iter()
        .filter(|repo| repo.status.has_conflicts())
        .map(aggregate)
        .collect()
}
