//! Enablement and labels for the merge / push / rebase / change-target controls.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use attempt_core::config::LabelsConfig;
use attempt_core::state::{ActionPhase, GitActionKind};

use crate::branch_status::AggregatedStatus;

/// Local "operation in flight" flags for one repository binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InFlightFlags {
    pub merging: bool,
    /// Covers both pushing to an open PR and creating one.
    pub pushing: bool,
    pub rebasing: bool,
    pub changing_target: bool,
    pub aborting: bool,
}

impl InFlightFlags {
    pub fn any(&self) -> bool {
        self.merging || self.pushing || self.rebasing || self.changing_target || self.aborting
    }

    pub fn is_set(&self, action: GitActionKind) -> bool {
        match action.pending_slot() {
            GitActionKind::Merge => self.merging,
            GitActionKind::Push | GitActionKind::CreatePr => self.pushing,
            GitActionKind::Rebase => self.rebasing,
            GitActionKind::ChangeTargetBranch => self.changing_target,
            GitActionKind::AbortConflicts => self.aborting,
        }
    }

    pub fn set(&mut self, action: GitActionKind, value: bool) {
        let slot = match action.pending_slot() {
            GitActionKind::Merge => &mut self.merging,
            GitActionKind::Push | GitActionKind::CreatePr => &mut self.pushing,
            GitActionKind::Rebase => &mut self.rebasing,
            GitActionKind::ChangeTargetBranch => &mut self.changing_target,
            GitActionKind::AbortConflicts => &mut self.aborting,
        };
        *slot = value;
    }
}

/// Actions whose "just succeeded" window is still open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivePulses(pub BTreeSet<GitActionKind>);

impl ActivePulses {
    pub fn is_active(&self, action: GitActionKind) -> bool {
        self.0.contains(&action)
    }

    /// A fresh merge or push keeps the "nothing to do" rules from flipping
    /// the controls while their success labels are showing.
    pub fn landing_pulse(&self) -> bool {
        self.is_active(GitActionKind::Merge)
            || self.is_active(GitActionKind::Push)
            || self.is_active(GitActionKind::CreatePr)
    }
}

impl FromIterator<GitActionKind> for ActivePulses {
    fn from_iter<T: IntoIterator<Item = GitActionKind>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionBlockReason {
    OperationInFlight,
    AttemptRunning,
    Conflicted,
    HasMergedPr,
    HasOpenPr,
    NothingToMerge,
    NothingToPush,
    /// Push was requested but the branch has no open PR to push into.
    NoOpenPr,
    NotConflicted,
    UnknownRepository,
}

impl std::fmt::Display for ActionBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ActionBlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionBlockReason::OperationInFlight => "operation_in_flight",
            ActionBlockReason::AttemptRunning => "attempt_running",
            ActionBlockReason::Conflicted => "conflicted",
            ActionBlockReason::HasMergedPr => "has_merged_pr",
            ActionBlockReason::HasOpenPr => "has_open_pr",
            ActionBlockReason::NothingToMerge => "nothing_to_merge",
            ActionBlockReason::NothingToPush => "nothing_to_push",
            ActionBlockReason::NoOpenPr => "no_open_pr",
            ActionBlockReason::NotConflicted => "not_conflicted",
            ActionBlockReason::UnknownRepository => "unknown_repository",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateInput<'a> {
    pub status: &'a AggregatedStatus,
    pub attempt_running: bool,
    pub in_flight: InFlightFlags,
    pub pulses: &'a ActivePulses,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGate {
    /// For the push control this is `Push` or `CreatePr` depending on PR state.
    pub action: GitActionKind,
    pub enabled: bool,
    pub phase: ActionPhase,
    pub label: String,
    pub reasons: Vec<ActionBlockReason>,
}

impl ActionGate {
    fn new(
        action: GitActionKind,
        phase: ActionPhase,
        label: &str,
        mut reasons: Vec<ActionBlockReason>,
    ) -> Self {
        reasons.sort_by_key(block_reason_rank);
        reasons.dedup();
        Self {
            action,
            enabled: reasons.is_empty(),
            phase,
            label: label.to_string(),
            reasons,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitActionGates {
    pub merge: ActionGate,
    pub push: ActionGate,
    pub rebase: ActionGate,
    pub change_target: ActionGate,
}

impl GitActionGates {
    pub fn for_action(&self, action: GitActionKind) -> Option<&ActionGate> {
        match action {
            GitActionKind::Merge => Some(&self.merge),
            GitActionKind::Push | GitActionKind::CreatePr if self.push.action == action => {
                Some(&self.push)
            }
            GitActionKind::Rebase => Some(&self.rebase),
            GitActionKind::ChangeTargetBranch => Some(&self.change_target),
            _ => None,
        }
    }
}

pub fn evaluate_gates(input: &GateInput<'_>, labels: &LabelsConfig) -> GitActionGates {
    GitActionGates {
        merge: evaluate_merge(input, labels),
        push: evaluate_push(input, labels),
        rebase: evaluate_rebase(input, labels),
        change_target: evaluate_change_target(input, labels),
    }
}

fn shared_blocks(input: &GateInput<'_>) -> Vec<ActionBlockReason> {
    let mut reasons = Vec::new();
    if input.in_flight.any() {
        reasons.push(ActionBlockReason::OperationInFlight);
    }
    if input.attempt_running {
        reasons.push(ActionBlockReason::AttemptRunning);
    }
    if input.status.has_conflicts {
        reasons.push(ActionBlockReason::Conflicted);
    }
    reasons
}

pub fn evaluate_merge(input: &GateInput<'_>, labels: &LabelsConfig) -> ActionGate {
    let info = &input.status.merge_info;
    let mut reasons = shared_blocks(input);

    if info.has_merged_pr {
        reasons.push(ActionBlockReason::HasMergedPr);
    }
    if info.has_open_pr {
        reasons.push(ActionBlockReason::HasOpenPr);
    }
    if input.status.commits_ahead() == 0 && !input.pulses.landing_pulse() {
        reasons.push(ActionBlockReason::NothingToMerge);
    }

    let phase = ActionPhase::resolve(
        input.in_flight.merging,
        input.pulses.is_active(GitActionKind::Merge),
    );
    ActionGate::new(
        GitActionKind::Merge,
        phase,
        labels.merge.for_phase(phase),
        reasons,
    )
}

/// Pushes into the open PR when there is one, otherwise offers to create one.
pub fn evaluate_push(input: &GateInput<'_>, labels: &LabelsConfig) -> ActionGate {
    let info = &input.status.merge_info;
    let mut reasons = shared_blocks(input);

    if info.has_merged_pr {
        reasons.push(ActionBlockReason::HasMergedPr);
    }

    let action = if info.has_open_pr {
        if input.status.status.remote_commits_ahead == Some(0) {
            reasons.push(ActionBlockReason::NothingToPush);
        }
        GitActionKind::Push
    } else {
        let nothing_new =
            input.status.commits_ahead() == 0 && input.status.remote_commits_ahead() == 0;
        if nothing_new && !input.pulses.landing_pulse() {
            reasons.push(ActionBlockReason::NothingToPush);
        }
        GitActionKind::CreatePr
    };

    let mode_labels = match action {
        GitActionKind::Push => &labels.push,
        _ => &labels.create_pr,
    };
    let created_pr = input.pulses.is_active(GitActionKind::CreatePr);
    let phase = ActionPhase::resolve(
        input.in_flight.pushing,
        created_pr || input.pulses.is_active(GitActionKind::Push),
    );
    // A PR created a moment ago flips the mode to push on the next refresh;
    // keep its success text until the pulse ends.
    let label = match phase {
        ActionPhase::Succeeded if created_pr => labels.create_pr.success.as_str(),
        ActionPhase::Succeeded => labels.push.success.as_str(),
        other => mode_labels.for_phase(other),
    };

    ActionGate::new(action, phase, label, reasons)
}

pub fn evaluate_rebase(input: &GateInput<'_>, labels: &LabelsConfig) -> ActionGate {
    let phase = ActionPhase::resolve(
        input.in_flight.rebasing,
        input.pulses.is_active(GitActionKind::Rebase),
    );
    ActionGate::new(
        GitActionKind::Rebase,
        phase,
        labels.rebase.for_phase(phase),
        shared_blocks(input),
    )
}

pub fn evaluate_change_target(input: &GateInput<'_>, labels: &LabelsConfig) -> ActionGate {
    let phase = ActionPhase::resolve(
        input.in_flight.changing_target,
        input.pulses.is_active(GitActionKind::ChangeTargetBranch),
    );
    ActionGate::new(
        GitActionKind::ChangeTargetBranch,
        phase,
        labels.change_target.for_phase(phase),
        shared_blocks(input),
    )
}

fn block_reason_rank(reason: &ActionBlockReason) -> u8 {
    match reason {
        ActionBlockReason::OperationInFlight => 0,
        ActionBlockReason::AttemptRunning => 1,
        ActionBlockReason::Conflicted => 2,
        ActionBlockReason::HasMergedPr => 3,
        ActionBlockReason::HasOpenPr => 4,
        ActionBlockReason::NothingToMerge => 5,
        ActionBlockReason::NothingToPush => 6,
        ActionBlockReason::NoOpenPr => 7,
        ActionBlockReason::NotConflicted => 8,
        ActionBlockReason::UnknownRepository => 9,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use attempt_core::config::LabelsConfig;
    use attempt_core::state::{ActionPhase, GitActionKind};
    use attempt_core::types::{
        BranchStatus, ConflictOp, Merge, MergeStatus, PrMerge, PullRequestInfo, RepoBranchStatus,
        RepoId,
    };

    use super::{
        evaluate_gates, ActionBlockReason, ActivePulses, GateInput, GitActionGates, InFlightFlags,
    };
    use crate::branch_status::{aggregate, AggregatedStatus};

    fn status_with(mutate: impl FnOnce(&mut BranchStatus)) -> AggregatedStatus {
        let mut status = BranchStatus {
            target_branch_name: "main".to_string(),
            commits_ahead: Some(2),
            remote_commits_ahead: Some(0),
            ..BranchStatus::default()
        };
        mutate(&mut status);
        aggregate(&RepoBranchStatus {
            repo_id: RepoId::new("api"),
            repo_name: "api".to_string(),
            status,
        })
    }

    fn pr(status: MergeStatus) -> Merge {
        Merge::Pr(PrMerge {
            target_branch_name: "main".to_string(),
            pr_info: PullRequestInfo {
                number: 42,
                url: "https://example.com/pr/42".to_string(),
                status,
                merged_at: None,
                merge_commit_sha: None,
            },
            created_at: Utc::now(),
        })
    }

    fn gates(
        status: &AggregatedStatus,
        running: bool,
        in_flight: InFlightFlags,
        pulses: &ActivePulses,
    ) -> GitActionGates {
        evaluate_gates(
            &GateInput {
                status,
                attempt_running: running,
                in_flight,
                pulses,
            },
            &LabelsConfig::default(),
        )
    }

    #[test]
    fn clean_branch_with_commits_enables_everything() {
        let status = status_with(|_| {});
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());

        assert!(result.merge.enabled);
        assert_eq!(result.merge.label, "Merge");
        assert!(result.push.enabled);
        assert_eq!(result.push.action, GitActionKind::CreatePr);
        assert_eq!(result.push.label, "Create PR");
        assert!(result.rebase.enabled);
        assert!(result.change_target.enabled);
    }

    #[test]
    fn merge_disabled_without_commits_ahead_and_no_pulse() {
        let status = status_with(|s| s.commits_ahead = Some(0));
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());

        assert!(!result.merge.enabled);
        assert_eq!(result.merge.reasons, vec![ActionBlockReason::NothingToMerge]);
        assert!(!result.push.enabled);
        assert_eq!(result.push.reasons, vec![ActionBlockReason::NothingToPush]);
    }

    #[test]
    fn missing_ahead_count_is_treated_as_zero() {
        let status = status_with(|s| s.commits_ahead = None);
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());
        assert!(!result.merge.enabled);
    }

    #[test]
    fn success_pulse_keeps_merge_showing_success_after_refresh() {
        let status = status_with(|s| s.commits_ahead = Some(0));
        let pulses: ActivePulses = [GitActionKind::Merge].into_iter().collect();
        let result = gates(&status, false, InFlightFlags::default(), &pulses);

        assert!(result.merge.enabled);
        assert_eq!(result.merge.phase, ActionPhase::Succeeded);
        assert_eq!(result.merge.label, "Merged!");
    }

    #[test]
    fn open_pr_switches_push_mode_and_blocks_merge() {
        let status = status_with(|s| {
            s.merges = vec![pr(MergeStatus::Open)];
            s.remote_commits_ahead = Some(1);
        });
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());

        assert!(!result.merge.enabled);
        assert_eq!(result.merge.reasons, vec![ActionBlockReason::HasOpenPr]);
        assert_eq!(result.push.action, GitActionKind::Push);
        assert!(result.push.enabled);
        assert_eq!(result.push.label, "Push");
    }

    #[test]
    fn push_to_open_pr_requires_remote_commits() {
        let status = status_with(|s| {
            s.merges = vec![pr(MergeStatus::Open)];
            s.remote_commits_ahead = Some(0);
        });
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());
        assert!(!result.push.enabled);
        assert_eq!(result.push.reasons, vec![ActionBlockReason::NothingToPush]);

        let unknown = status_with(|s| {
            s.merges = vec![pr(MergeStatus::Open)];
            s.remote_commits_ahead = None;
        });
        let result = gates(&unknown, false, InFlightFlags::default(), &ActivePulses::default());
        assert!(result.push.enabled);
    }

    #[test]
    fn create_pr_allowed_with_only_remote_commits() {
        let status = status_with(|s| {
            s.commits_ahead = Some(0);
            s.remote_commits_ahead = Some(3);
        });
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());
        assert!(result.push.enabled);
        assert_eq!(result.push.action, GitActionKind::CreatePr);
    }

    #[test]
    fn merged_pr_blocks_merge_and_push() {
        let status = status_with(|s| s.merges = vec![pr(MergeStatus::Merged)]);
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());

        assert!(!result.merge.enabled);
        assert!(result.merge.reasons.contains(&ActionBlockReason::HasMergedPr));
        assert!(!result.push.enabled);
        assert!(result.rebase.enabled);
    }

    #[test]
    fn conflicts_and_running_attempt_block_all_controls_in_rank_order() {
        let status = status_with(|s| {
            s.conflicted_files = vec!["a.rs".to_string()];
            s.conflict_op = Some(ConflictOp::Rebase);
            s.commits_ahead = Some(0);
        });
        let result = gates(&status, true, InFlightFlags::default(), &ActivePulses::default());

        assert_eq!(
            result.merge.reasons,
            vec![
                ActionBlockReason::AttemptRunning,
                ActionBlockReason::Conflicted,
                ActionBlockReason::NothingToMerge
            ]
        );
        assert!(!result.rebase.enabled);
        assert!(!result.change_target.enabled);
        assert_eq!(
            result.change_target.reasons,
            vec![
                ActionBlockReason::AttemptRunning,
                ActionBlockReason::Conflicted
            ]
        );
    }

    #[test]
    fn in_flight_operation_blocks_and_relabels() {
        let status = status_with(|_| {});
        let in_flight = InFlightFlags {
            rebasing: true,
            ..InFlightFlags::default()
        };
        let result = gates(&status, false, in_flight, &ActivePulses::default());

        assert!(!result.rebase.enabled);
        assert_eq!(result.rebase.phase, ActionPhase::InProgress);
        assert_eq!(result.rebase.label, "Rebasing...");
        assert!(!result.merge.enabled);
        assert_eq!(result.merge.label, "Merge");
        assert_eq!(
            result.merge.reasons,
            vec![ActionBlockReason::OperationInFlight]
        );
    }

    #[test]
    fn created_pr_pulse_keeps_create_label_after_mode_flip() {
        let status = status_with(|s| {
            s.merges = vec![pr(MergeStatus::Open)];
            s.remote_commits_ahead = Some(0);
        });
        let pulses: ActivePulses = [GitActionKind::CreatePr].into_iter().collect();
        let result = gates(&status, false, InFlightFlags::default(), &pulses);

        assert_eq!(result.push.action, GitActionKind::Push);
        assert_eq!(result.push.phase, ActionPhase::Succeeded);
        assert_eq!(result.push.label, "PR Created!");
    }

    #[test]
    fn in_flight_flags_map_create_pr_onto_push_slot() {
        let mut flags = InFlightFlags::default();
        flags.set(GitActionKind::CreatePr, true);
        assert!(flags.pushing);
        assert!(flags.is_set(GitActionKind::Push));
        assert!(flags.any());
        flags.set(GitActionKind::Push, false);
        assert!(!flags.any());
    }

    #[test]
    fn for_action_matches_push_mode() {
        let status = status_with(|_| {});
        let result = gates(&status, false, InFlightFlags::default(), &ActivePulses::default());
        assert!(result.for_action(GitActionKind::CreatePr).is_some());
        assert!(result.for_action(GitActionKind::Push).is_none());
        assert!(result.for_action(GitActionKind::AbortConflicts).is_none());
    }
}
