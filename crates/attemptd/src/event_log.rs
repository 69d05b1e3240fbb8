use attempt_core::events::Event;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only JSONL log: one global file plus one file per workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlEventLog {
    pub root: PathBuf,
    pub global_file: PathBuf,
    pub workspace_dir: PathBuf,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_file = root.join("global.jsonl");
        let workspace_dir = root.join("workspaces");
        Self {
            root,
            global_file,
            workspace_dir,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        for dir in [&self.root, &self.workspace_dir] {
            fs::create_dir_all(dir).map_err(|source| EventLogError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn append_global(&self, event: &Event) -> Result<(), EventLogError> {
        append_json_line(&self.global_file, event)
    }

    pub fn append_workspace(&self, event: &Event) -> Result<(), EventLogError> {
        append_json_line(&self.workspace_log_path(&event.workspace_id.0), event)
    }

    pub fn append_both(&self, event: &Event) -> Result<(), EventLogError> {
        self.ensure_layout()?;
        self.append_global(event)?;
        self.append_workspace(event)?;
        Ok(())
    }

    pub fn workspace_log_path(&self, workspace_id: &str) -> PathBuf {
        self.workspace_dir.join(format!("{workspace_id}.jsonl"))
    }

    pub fn global_log_path(&self) -> &Path {
        self.global_file.as_path()
    }
}

fn append_json_line(path: &Path, event: &Event) -> Result<(), EventLogError> {
    let mut line =
        serde_json::to_string(event).map_err(|source| EventLogError::Serialize { source })?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(line.as_bytes())
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })
}
