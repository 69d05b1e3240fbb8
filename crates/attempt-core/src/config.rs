//! Display and timing configuration for the workspace sync engines.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::ActionPhase;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub conflict: ConflictDisplayConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Label text for each phase of one action control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLabels {
    pub idle: String,
    pub in_progress: String,
    pub success: String,
}

impl PhaseLabels {
    pub fn new(idle: &str, in_progress: &str, success: &str) -> Self {
        Self {
            idle: idle.to_string(),
            in_progress: in_progress.to_string(),
            success: success.to_string(),
        }
    }

    pub fn for_phase(&self, phase: ActionPhase) -> &str {
        match phase {
            ActionPhase::Idle => &self.idle,
            ActionPhase::InProgress => &self.in_progress,
            ActionPhase::Succeeded => &self.success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelsConfig {
    #[serde(default = "default_merge_labels")]
    pub merge: PhaseLabels,
    #[serde(default = "default_push_labels")]
    pub push: PhaseLabels,
    #[serde(default = "default_create_pr_labels")]
    pub create_pr: PhaseLabels,
    #[serde(default = "default_rebase_labels")]
    pub rebase: PhaseLabels,
    #[serde(default = "default_change_target_labels")]
    pub change_target: PhaseLabels,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            merge: default_merge_labels(),
            push: default_push_labels(),
            create_pr: default_create_pr_labels(),
            rebase: default_rebase_labels(),
            change_target: default_change_target_labels(),
        }
    }
}

impl LabelsConfig {
    pub fn all(&self) -> [(&'static str, &PhaseLabels); 5] {
        [
            ("merge", &self.merge),
            ("push", &self.push),
            ("create_pr", &self.create_pr),
            ("rebase", &self.rebase),
            ("change_target", &self.change_target),
        ]
    }
}

fn default_merge_labels() -> PhaseLabels {
    PhaseLabels::new("Merge", "Merging...", "Merged!")
}

fn default_push_labels() -> PhaseLabels {
    PhaseLabels::new("Push", "Pushing...", "Pushed!")
}

fn default_create_pr_labels() -> PhaseLabels {
    PhaseLabels::new("Create PR", "Creating...", "PR Created!")
}

fn default_rebase_labels() -> PhaseLabels {
    PhaseLabels::new("Rebase", "Rebasing...", "Rebased!")
}

fn default_change_target_labels() -> PhaseLabels {
    PhaseLabels::new("Change target", "Changing...", "Target changed!")
}

/// How the conflicted-file list is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDisplayConfig {
    #[serde(default = "default_max_listed_files")]
    pub max_listed_files: usize,
    /// Supports `{shown}` and `{total}` placeholders.
    #[serde(default = "default_overflow_template")]
    pub overflow_template: String,
}

impl Default for ConflictDisplayConfig {
    fn default() -> Self {
        Self {
            max_listed_files: default_max_listed_files(),
            overflow_template: default_overflow_template(),
        }
    }
}

impl ConflictDisplayConfig {
    pub fn render_overflow(&self, shown: usize, total: usize) -> String {
        self.overflow_template
            .replace("{shown}", &shown.to_string())
            .replace("{total}", &total.to_string())
    }
}

fn default_max_listed_files() -> usize {
    8
}

fn default_overflow_template() -> String {
    "Showing {shown} of {total} conflicted files".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_success_pulse_ms")]
    pub success_pulse_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            success_pulse_ms: default_success_pulse_ms(),
        }
    }
}

impl TimingConfig {
    pub fn success_pulse(&self) -> Duration {
        Duration::from_millis(self.success_pulse_ms)
    }
}

fn default_success_pulse_ms() -> u64 {
    2000
}

pub fn parse_sync_config(contents: &str) -> Result<SyncConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_sync_config(path: impl AsRef<Path>) -> Result<SyncConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_sync_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Loads `path` when it exists, otherwise returns the built-in defaults.
pub fn load_sync_config_or_default(path: impl AsRef<Path>) -> Result<SyncConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(SyncConfig::default());
    }
    load_sync_config(path_ref)
}

pub fn save_sync_config(path: impl AsRef<Path>, config: &SyncConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    let parent = path_ref.parent().map(Path::to_path_buf);
    if let Some(parent_dir) = parent {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{file_name}-{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_sync_config("").expect("parse empty config");
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.conflict.max_listed_files, 8);
        assert_eq!(config.timing.success_pulse(), Duration::from_millis(2000));
        assert_eq!(config.labels.merge.success, "Merged!");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_sync_config(
            r#"
[labels.merge]
idle = "Land"
in_progress = "Landing..."
success = "Landed!"

[conflict]
max_listed_files = 3
"#,
        )
        .expect("parse partial config");

        assert_eq!(config.labels.merge.idle, "Land");
        assert_eq!(config.labels.push.idle, "Push");
        assert_eq!(config.conflict.max_listed_files, 3);
        assert_eq!(
            config.conflict.overflow_template,
            "Showing {shown} of {total} conflicted files"
        );
    }

    #[test]
    fn phase_labels_pick_text_for_each_phase() {
        let labels = PhaseLabels::new("Merge", "Merging...", "Merged!");
        assert_eq!(labels.for_phase(ActionPhase::Idle), "Merge");
        assert_eq!(labels.for_phase(ActionPhase::InProgress), "Merging...");
        assert_eq!(labels.for_phase(ActionPhase::Succeeded), "Merged!");
    }

    #[test]
    fn overflow_template_substitutes_counts() {
        let display = ConflictDisplayConfig::default();
        assert_eq!(
            display.render_overflow(8, 12),
            "Showing 8 of 12 conflicted files"
        );
    }

    #[test]
    fn save_and_load_roundtrip() {
        let mut config = SyncConfig::default();
        config.timing.success_pulse_ms = 1500;
        config.labels.rebase = PhaseLabels::new("Update", "Updating...", "Updated!");

        let path = unique_temp_path("attempt-sync-config-test");
        save_sync_config(&path, &config).expect("save config");
        let loaded = load_sync_config(&path).expect("load config");
        assert_eq!(loaded, config);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_classifies_read_and_parse_errors() {
        let missing_path = unique_temp_path("attempt-sync-missing-config");
        let err = load_sync_config(&missing_path).expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Read { path, .. } if path == missing_path));

        let invalid_path = unique_temp_path("attempt-sync-invalid-config");
        fs::write(&invalid_path, "[conflict\n").expect("write invalid config fixture");
        let err = load_sync_config(&invalid_path).expect_err("invalid config should fail");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == invalid_path));
        let _ = fs::remove_file(invalid_path);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let missing_path = unique_temp_path("attempt-sync-absent-config");
        let config = load_sync_config_or_default(&missing_path).expect("defaults");
        assert_eq!(config, SyncConfig::default());
    }
}
