use std::string::FromUtf8Error;

use attempt_core::types::ConflictOp;

/// Failure reported by the external git-operations service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GitOpsError {
    #[error("request rejected: {message}")]
    Rejected { message: String },
    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },
    #[error("{op} stopped with conflicts: {message}")]
    Conflicted { op: ConflictOp, message: String },
    #[error("git service unreachable: {message}")]
    Transport { message: String },
    #[error("not found: {what}")]
    NotFound { what: String },
}

impl GitOpsError {
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        GitOpsError::Failed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Text shown inline next to the control that triggered the call.
    pub fn user_message(&self) -> String {
        match self {
            GitOpsError::Rejected { message }
            | GitOpsError::Failed { message, .. }
            | GitOpsError::Conflicted { message, .. }
            | GitOpsError::Transport { message } => message.clone(),
            GitOpsError::NotFound { what } => format!("{what} not found"),
        }
    }

    /// Set when the call left the worktree conflicted; a status refresh will show it.
    pub fn conflict_op(&self) -> Option<ConflictOp> {
        match self {
            GitOpsError::Conflicted { op, .. } => Some(*op),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GitCliError {
    #[error("git command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("git command output was not valid UTF-8 ({command}): {source}")]
    NonUtf8Output {
        command: String,
        #[source]
        source: FromUtf8Error,
    },
    #[error("invalid git output: {context}")]
    Parse { context: String },
}

impl From<GitCliError> for GitOpsError {
    fn from(err: GitCliError) -> Self {
        GitOpsError::Transport {
            message: err.to_string(),
        }
    }
}
