//! Reads `BranchStatus` for local worktrees through the `git` CLI.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use attempt_core::types::{BranchStatus, ConflictOp, Merge, RepoBranchStatus, RepoId, WorkspaceId};

use crate::error::{GitCliError, GitOpsError};
use crate::service::BranchStatusSource;

/// The `git` binary, used only for read-only queries against a worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusGit {
    binary: PathBuf,
}

impl Default for StatusGit {
    fn default() -> Self {
        Self::new("git")
    }
}

impl StatusGit {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs one query and returns its stdout.
    pub fn query(&self, worktree: &Path, args: &[&str]) -> Result<String, GitCliError> {
        let rendered = format!("{} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary)
            .current_dir(worktree)
            // Polling must never take the index lock from a running agent.
            .env("GIT_OPTIONAL_LOCKS", "0")
            .args(args)
            .output()
            .map_err(|source| GitCliError::Io {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitCliError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|source| GitCliError::NonUtf8Output {
            command: rendered,
            source,
        })
    }

    /// A failing query (unborn HEAD, unknown ref, no upstream) yields `None`.
    pub fn query_optional(
        &self,
        worktree: &Path,
        args: &[&str],
    ) -> Result<Option<String>, GitCliError> {
        match self.query(worktree, args) {
            Ok(stdout) => Ok(Some(stdout)),
            Err(GitCliError::CommandFailed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn left_right(&self, worktree: &Path, range: &str) -> Result<Option<(usize, usize)>, GitCliError> {
        self.query_optional(worktree, &["rev-list", "--left-right", "--count", range])?
            .map(|out| parse_left_right_counts(&out))
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Changed,
    Unmerged,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub path: String,
    pub status_code: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorktreeCounts {
    pub uncommitted: usize,
    pub untracked: usize,
    pub conflicted_files: Vec<String>,
}

/// A worktree checked out for one repository of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRepoBinding {
    pub repo_id: RepoId,
    pub repo_name: String,
    pub worktree_path: PathBuf,
    pub target_branch: String,
    /// Merge records live in the attempt database and are passed through as-is.
    #[serde(default)]
    pub merges: Vec<Merge>,
}

#[derive(Debug, Clone)]
pub struct LocalStatusReader {
    git: StatusGit,
    repos: Vec<LocalRepoBinding>,
}

impl LocalStatusReader {
    pub fn new(git: StatusGit, repos: Vec<LocalRepoBinding>) -> Self {
        Self { git, repos }
    }

    pub fn repos(&self) -> &[LocalRepoBinding] {
        &self.repos
    }
}

#[async_trait]
impl BranchStatusSource for LocalStatusReader {
    async fn branch_status(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<RepoBranchStatus>, GitOpsError> {
        let mut results = Vec::with_capacity(self.repos.len());

        for repo in &self.repos {
            let git = self.git.clone();
            let worktree = repo.worktree_path.clone();
            let target = repo.target_branch.clone();
            let joined =
                tokio::task::spawn_blocking(move || read_branch_status(&git, &worktree, &target))
                    .await
                    .map_err(|err| GitOpsError::Transport {
                        message: format!("status task join failed: {err}"),
                    })?;

            let mut status = match joined {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(
                        workspace = %workspace,
                        repo = %repo.repo_id,
                        error = %err,
                        "failed to read branch status; reporting unknown values"
                    );
                    BranchStatus {
                        target_branch_name: repo.target_branch.clone(),
                        ..BranchStatus::default()
                    }
                }
            };
            status.merges = repo.merges.clone();

            results.push(RepoBranchStatus {
                repo_id: repo.repo_id.clone(),
                repo_name: repo.repo_name.clone(),
                status,
            });
        }

        Ok(results)
    }
}

/// Collects branch facts for one worktree. Merge records are left empty.
pub fn read_branch_status(
    git: &StatusGit,
    worktree: &Path,
    target_branch: &str,
) -> Result<BranchStatus, GitCliError> {
    let head_oid = git
        .query_optional(worktree, &["rev-parse", "HEAD"])?
        .map(|out| out.trim().to_string())
        .filter(|oid| !oid.is_empty());

    let git_dir = PathBuf::from(
        git.query(worktree, &["rev-parse", "--absolute-git-dir"])?
            .trim(),
    );

    let porcelain = git.query(
        worktree,
        &["status", "--porcelain=v1", "-z", "--untracked-files=all"],
    )?;
    let entries = parse_porcelain_z(&porcelain)?;
    let counts = summarize_entries(&entries);

    let is_rebase_in_progress =
        git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists();
    let conflict_op = detect_conflict_op(
        &git_dir,
        is_rebase_in_progress,
        !counts.conflicted_files.is_empty(),
    );

    let target_range = format!("HEAD...{target_branch}");
    let target_counts = git.left_right(worktree, &target_range)?;
    if target_counts.is_none() {
        tracing::debug!(target_branch = %target_branch, "target branch not resolvable");
    }
    let upstream_counts = git.left_right(worktree, "HEAD...@{upstream}")?;

    Ok(BranchStatus {
        target_branch_name: target_branch.to_string(),
        head_oid,
        commits_ahead: target_counts.map(|(ahead, _)| ahead),
        commits_behind: target_counts.map(|(_, behind)| behind),
        remote_commits_ahead: upstream_counts.map(|(ahead, _)| ahead),
        remote_commits_behind: upstream_counts.map(|(_, behind)| behind),
        has_uncommitted_changes: Some(counts.uncommitted > 0),
        uncommitted_count: Some(counts.uncommitted),
        untracked_count: Some(counts.untracked),
        conflicted_files: counts.conflicted_files,
        conflict_op,
        is_rebase_in_progress,
        merges: Vec::new(),
    })
}

/// Only reports an operation while something is actually conflicted or a rebase is stopped.
pub fn detect_conflict_op(
    git_dir: &Path,
    rebase_in_progress: bool,
    has_conflicted_files: bool,
) -> Option<ConflictOp> {
    if rebase_in_progress {
        return Some(ConflictOp::Rebase);
    }
    if !has_conflicted_files {
        return None;
    }
    if git_dir.join("MERGE_HEAD").exists() {
        return Some(ConflictOp::Merge);
    }
    if git_dir.join("CHERRY_PICK_HEAD").exists() {
        return Some(ConflictOp::CherryPick);
    }
    if git_dir.join("REVERT_HEAD").exists() {
        return Some(ConflictOp::Revert);
    }
    None
}

/// Parses `git status --porcelain=v1 -z`. Rename/copy records carry the
/// original path as an extra NUL-separated field, which is skipped.
pub fn parse_porcelain_z(raw: &str) -> Result<Vec<StatusEntry>, GitCliError> {
    let mut entries = Vec::new();
    let mut fields = raw.split('\0').filter(|field| !field.is_empty());

    while let Some(record) = fields.next() {
        if record.len() < 4 || !record.is_char_boundary(2) || !record.is_char_boundary(3) {
            return Err(GitCliError::Parse {
                context: format!("invalid porcelain status record: {record:?}"),
            });
        }

        let code = &record[0..2];
        let path = record[3..].to_string();
        if code.contains('R') || code.contains('C') {
            fields.next();
        }

        entries.push(StatusEntry {
            path,
            status_code: code.to_string(),
            kind: entry_kind_from_code(code),
        });
    }

    Ok(entries)
}

fn entry_kind_from_code(code: &str) -> EntryKind {
    match code {
        "??" => EntryKind::Untracked,
        "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU" => EntryKind::Unmerged,
        _ => EntryKind::Changed,
    }
}

/// Unmerged paths count as uncommitted as well as conflicted.
pub fn summarize_entries(entries: &[StatusEntry]) -> WorktreeCounts {
    let mut counts = WorktreeCounts::default();
    for entry in entries {
        match entry.kind {
            EntryKind::Untracked => counts.untracked += 1,
            EntryKind::Unmerged => {
                counts.uncommitted += 1;
                counts.conflicted_files.push(entry.path.clone());
            }
            EntryKind::Changed => counts.uncommitted += 1,
        }
    }
    counts
}

fn parse_left_right_counts(raw: &str) -> Result<(usize, usize), GitCliError> {
    let mut parts = raw.split_whitespace();
    let parse = |value: Option<&str>| {
        value
            .and_then(|text| text.parse::<usize>().ok())
            .ok_or_else(|| GitCliError::Parse {
                context: format!("expected '<ahead>\\t<behind>' from rev-list, got {raw:?}"),
            })
    };
    let ahead = parse(parts.next())?;
    let behind = parse(parts.next())?;
    Ok((ahead, behind))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::process::Command;

    use super::{
        detect_conflict_op, parse_left_right_counts, parse_porcelain_z, read_branch_status,
        summarize_entries, EntryKind, LocalRepoBinding, LocalStatusReader, StatusGit,
    };
    use crate::error::GitCliError;
    use crate::service::BranchStatusSource;
    use attempt_core::types::{ConflictOp, RepoId, WorkspaceId};

    fn run_git(cwd: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=Test User",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo(root: &Path) {
        run_git(root, &["init", "-b", "main"]);
        fs::write(root.join("README.md"), "init\n").expect("write file");
        run_git(root, &["add", "README.md"]);
        run_git(root, &["commit", "-m", "init"]);
    }

    #[test]
    fn porcelain_parser_classifies_entries_and_skips_rename_sources() {
        let raw = " M src/lib.rs\0R  new.rs\0old.rs\0UU conflict.rs\0?? notes.txt\0";
        let entries = parse_porcelain_z(raw).expect("parse porcelain");

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].path, "new.rs");
        assert_eq!(entries[2].kind, EntryKind::Unmerged);
        assert_eq!(entries[3].kind, EntryKind::Untracked);

        let counts = summarize_entries(&entries);
        assert_eq!(counts.uncommitted, 3);
        assert_eq!(counts.untracked, 1);
        assert_eq!(counts.conflicted_files, vec!["conflict.rs".to_string()]);
    }

    #[test]
    fn porcelain_parser_rejects_truncated_records() {
        assert!(parse_porcelain_z("M\0").is_err());
    }

    #[test]
    fn left_right_counts_parse_tab_separated_output() {
        assert_eq!(parse_left_right_counts("3\t1\n").expect("counts"), (3, 1));
        assert!(parse_left_right_counts("nonsense").is_err());
    }

    #[test]
    fn conflict_op_requires_conflicts_or_rebase() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("MERGE_HEAD"), "abc\n").expect("write marker");

        assert_eq!(detect_conflict_op(dir.path(), false, false), None);
        assert_eq!(
            detect_conflict_op(dir.path(), false, true),
            Some(ConflictOp::Merge)
        );
        assert_eq!(
            detect_conflict_op(dir.path(), true, false),
            Some(ConflictOp::Rebase)
        );
    }

    #[test]
    fn reads_ahead_and_dirty_counts_from_real_repository() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path();
        init_repo(root);
        run_git(root, &["checkout", "-b", "attempt/feature"]);
        fs::write(root.join("feature.txt"), "one\n").expect("write file");
        run_git(root, &["add", "feature.txt"]);
        run_git(root, &["commit", "-m", "feature"]);
        fs::write(root.join("README.md"), "changed\n").expect("modify file");
        fs::write(root.join("scratch.txt"), "tmp\n").expect("untracked file");

        let status = read_branch_status(&StatusGit::default(), root, "main").expect("status");

        assert_eq!(status.commits_ahead, Some(1));
        assert_eq!(status.commits_behind, Some(0));
        assert_eq!(status.remote_commits_ahead, None);
        assert_eq!(status.uncommitted_count, Some(1));
        assert_eq!(status.untracked_count, Some(1));
        assert_eq!(status.has_uncommitted_changes, Some(true));
        assert_eq!(status.head_oid.as_deref().map(str::len), Some(40));
        assert!(status.conflict_op.is_none());
        assert!(status.conflict_invariant_holds());
    }

    #[test]
    fn reads_merge_conflict_from_real_repository() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path();
        init_repo(root);
        run_git(root, &["checkout", "-b", "attempt/feature"]);
        fs::write(root.join("README.md"), "feature\n").expect("write file");
        run_git(root, &["commit", "-am", "feature edit"]);
        run_git(root, &["checkout", "main"]);
        fs::write(root.join("README.md"), "main\n").expect("write file");
        run_git(root, &["commit", "-am", "main edit"]);
        run_git(root, &["checkout", "attempt/feature"]);

        let merge = Command::new("git")
            .args(["-c", "user.name=T", "-c", "user.email=t@example.com"])
            .args(["merge", "main"])
            .current_dir(root)
            .output()
            .expect("spawn git merge");
        assert!(!merge.status.success(), "merge should conflict");

        let status = read_branch_status(&StatusGit::default(), root, "main").expect("status");
        assert_eq!(status.conflict_op, Some(ConflictOp::Merge));
        assert_eq!(status.conflicted_files, vec!["README.md".to_string()]);
        assert!(!status.is_rebase_in_progress);
        assert!(status.conflict_invariant_holds());
    }

    #[test]
    fn optional_query_maps_failed_command_to_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        init_repo(dir.path());
        let git = StatusGit::default();

        let missing = git
            .query_optional(dir.path(), &["rev-parse", "--verify", "refs/heads/nope"])
            .expect("failed query is not an error");
        assert!(missing.is_none());

        let err = git
            .query(dir.path(), &["rev-parse", "--verify", "refs/heads/nope"])
            .expect_err("unknown ref");
        match err {
            GitCliError::CommandFailed { command, status, .. } => {
                assert!(command.contains("refs/heads/nope"));
                assert!(status.is_some());
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_an_io_error_even_for_optional_queries() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = StatusGit::new("/definitely/missing/git-binary")
            .query_optional(dir.path(), &["status"])
            .expect_err("missing binary");
        assert!(matches!(err, GitCliError::Io { .. }));
    }

    #[tokio::test]
    async fn reader_degrades_unreadable_repos_instead_of_failing() {
        let good = tempfile::tempdir().expect("temp dir");
        init_repo(good.path());
        let missing = good.path().join("does-not-exist");

        let reader = LocalStatusReader::new(
            StatusGit::default(),
            vec![
                LocalRepoBinding {
                    repo_id: RepoId::new("api"),
                    repo_name: "api".to_string(),
                    worktree_path: good.path().to_path_buf(),
                    target_branch: "main".to_string(),
                    merges: Vec::new(),
                },
                LocalRepoBinding {
                    repo_id: RepoId::new("web"),
                    repo_name: "web".to_string(),
                    worktree_path: missing,
                    target_branch: "develop".to_string(),
                    merges: Vec::new(),
                },
            ],
        );

        let statuses = reader
            .branch_status(&WorkspaceId::new("ws"))
            .await
            .expect("statuses");
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].status.commits_ahead, Some(0));
        assert_eq!(statuses[1].status.target_branch_name, "develop");
        assert_eq!(statuses[1].status.head_oid, None);
    }
}
