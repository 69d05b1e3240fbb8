use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::GitActionKind;
use crate::types::{ConflictOp, EventId, RepoId, WorkspaceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ActionStarted {
        action: GitActionKind,
    },
    ActionSucceeded {
        action: GitActionKind,
    },
    ActionFailed {
        action: GitActionKind,
        message: String,
    },
    ActionRejected {
        action: GitActionKind,
        reasons: Vec<String>,
    },
    ConflictDetected {
        op: Option<ConflictOp>,
        files: Vec<String>,
    },
    ConflictCleared,
    SuccessPulseExpired {
        action: GitActionKind,
    },
    RestoreConfirmed {
        perform_git_reset: bool,
        force_when_dirty: bool,
    },
    RestoreCanceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub workspace_id: WorkspaceId,
    pub repo_id: Option<RepoId>,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}
