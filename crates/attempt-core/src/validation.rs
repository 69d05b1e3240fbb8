//! Validation for configuration and externally reported status.

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::types::{RepoBranchStatus, RepoBinding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for SyncConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (action, labels) in self.labels.all() {
            let empty = [&labels.idle, &labels.in_progress, &labels.success]
                .iter()
                .any(|text| text.trim().is_empty());
            if empty {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "labels.empty",
                    message: format!("{action} labels must not be empty"),
                });
            }
        }

        if self.conflict.max_listed_files == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "conflict.max_listed_files.zero",
                message: "max_listed_files must be greater than zero".to_string(),
            });
        }

        let template = &self.conflict.overflow_template;
        if !template.contains("{shown}") || !template.contains("{total}") {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "conflict.overflow_template.placeholders",
                message: "overflow_template should contain both {shown} and {total}".to_string(),
            });
        }

        if self.timing.success_pulse_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "timing.success_pulse.zero",
                message: "success_pulse_ms is 0; success labels will never be shown".to_string(),
            });
        }

        issues
    }
}

impl Validate for RepoBinding {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.repo_id.0.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "binding.repo_id.empty",
                message: "repo_id must not be empty".to_string(),
            });
        }

        if self.target_branch.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "binding.target_branch.empty",
                message: format!("repo {} has no target branch", self.repo_id),
            });
        }

        issues
    }
}

/// Status is still trusted when these fire; they only flag suspicious refreshes.
impl Validate for RepoBranchStatus {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let status = &self.status;

        if !status.conflict_invariant_holds() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "status.conflict_op.mismatch",
                message: format!(
                    "repo {}: conflict_op={:?} but {} conflicted file(s), rebase_in_progress={}",
                    self.repo_id,
                    status.conflict_op,
                    status.conflicted_files.len(),
                    status.is_rebase_in_progress
                ),
            });
        }

        let open_prs = status
            .merges
            .iter()
            .filter_map(|merge| merge.pull_request())
            .filter(|pr| pr.status == crate::types::MergeStatus::Open)
            .count();
        if open_prs > 1 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "status.merges.multiple_open_prs",
                message: format!(
                    "repo {} reports {open_prs} open pull requests; the most recent one is used",
                    self.repo_id
                ),
            });
        }

        let counted_changes = status.uncommitted_count.unwrap_or(0);
        if status.has_uncommitted_changes == Some(false) && counted_changes > 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "status.uncommitted.inconsistent",
                message: format!(
                    "repo {} reports a clean worktree with {counted_changes} changed path(s)",
                    self.repo_id
                ),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::{Validate, ValidationLevel};
    use crate::config::{PhaseLabels, SyncConfig};
    use crate::types::{
        BranchStatus, ConflictOp, Merge, MergeStatus, PrMerge, PullRequestInfo, RepoBinding,
        RepoBranchStatus, RepoId, WorkspaceId,
    };
    use chrono::Utc;

    fn status(repo: &str) -> RepoBranchStatus {
        RepoBranchStatus {
            repo_id: RepoId::new(repo),
            repo_name: repo.to_string(),
            status: BranchStatus {
                target_branch_name: "main".to_string(),
                ..BranchStatus::default()
            },
        }
    }

    fn open_pr(number: u64) -> Merge {
        Merge::Pr(PrMerge {
            target_branch_name: "main".to_string(),
            pr_info: PullRequestInfo {
                number,
                url: format!("https://example.com/pr/{number}"),
                status: MergeStatus::Open,
                merged_at: None,
                merge_commit_sha: None,
            },
            created_at: Utc::now(),
        })
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_empty());
    }

    #[test]
    fn config_validation_reports_zero_cap_and_empty_labels() {
        let mut config = SyncConfig::default();
        config.conflict.max_listed_files = 0;
        config.labels.push = PhaseLabels::new("Push", " ", "Pushed!");

        let issues = config.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|issue| {
            issue.level == ValidationLevel::Error && issue.code == "conflict.max_listed_files.zero"
        }));
        assert!(issues
            .iter()
            .any(|issue| issue.code == "labels.empty" && issue.message.starts_with("push")));
    }

    #[test]
    fn config_validation_warns_on_template_and_pulse() {
        let mut config = SyncConfig::default();
        config.conflict.overflow_template = "{shown} files".to_string();
        config.timing.success_pulse_ms = 0;

        let issues = config.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .all(|issue| issue.level == ValidationLevel::Warning));
    }

    #[test]
    fn binding_validation_requires_target_branch() {
        let binding = RepoBinding {
            workspace_id: WorkspaceId::new("ws"),
            repo_id: RepoId::new("api"),
            repo_name: "api".to_string(),
            target_branch: "".to_string(),
        };
        let issues = binding.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "binding.target_branch.empty");
    }

    #[test]
    fn status_validation_flags_conflict_mismatch() {
        let mut repo = status("api");
        repo.status.conflicted_files = vec!["a.rs".to_string()];

        let issues = repo.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "status.conflict_op.mismatch");

        repo.status.conflict_op = Some(ConflictOp::Merge);
        assert!(repo.validate().is_empty());
    }

    #[test]
    fn status_validation_flags_multiple_open_prs() {
        let mut repo = status("api");
        repo.status.merges = vec![open_pr(2), open_pr(1)];

        let issues = repo.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.code == "status.merges.multiple_open_prs"));
    }

    #[test]
    fn status_validation_flags_inconsistent_dirty_flag() {
        let mut repo = status("api");
        repo.status.has_uncommitted_changes = Some(false);
        repo.status.untracked_count = Some(3);
        assert!(repo.validate().is_empty());

        repo.status.uncommitted_count = Some(2);
        let issues = repo.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "status.uncommitted.inconsistent");
    }
}
