//! Runs gated git actions for one workspace view.
//!
//! Each action is checked against the current gates, marked pending for its
//! repository, dispatched to the git-operations service, and then settled:
//! success opens a short pulse window, failure is kept as the inline error
//! for that action. Nothing here returns an error; every path ends in an
//! [`ActionOutcome`] and a well-defined state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use attempt_core::config::SyncConfig;
use attempt_core::events::{Event, EventKind};
use attempt_core::state::GitActionKind;
use attempt_core::types::{
    is_attempt_running, EventId, ExecutionProcess, RepoBranchStatus, RepoId, WorkspaceId,
};
use attempt_git::error::GitOpsError;
use attempt_git::service::{BranchStatusSource, CreatePrRequest, GitOperations, RebaseRequest};

use crate::action_gate::{
    evaluate_gates, ActionBlockReason, GateInput, GitActionGates, InFlightFlags,
};
use crate::branch_status::{aggregate, conflicted_repos, select_repo_status, AggregatedStatus};
use crate::checkpoint_restore::RestoreDecision;
use crate::conflict::{AbortRejection, ConflictController, ConflictSnapshot, ConflictTransition};
use crate::event_log::JsonlEventLog;
use crate::pulse::SuccessPulses;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pr_url: Option<String>,
    },
    Rejected {
        reasons: Vec<ActionBlockReason>,
    },
    Failed {
        message: String,
    },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded { .. })
    }
}

#[derive(Debug)]
struct RepoEntry {
    status: AggregatedStatus,
    in_flight: InFlightFlags,
    conflict: ConflictController,
    last_errors: HashMap<GitActionKind, String>,
}

#[derive(Debug, Default)]
struct SyncState {
    latest: Vec<RepoBranchStatus>,
    repos: HashMap<RepoId, RepoEntry>,
    attempt_running: bool,
}

fn lock_state(state: &Mutex<SyncState>) -> MutexGuard<'_, SyncState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears one pending flag when dropped, whatever way the dispatch ended.
struct PendingGuard {
    state: Arc<Mutex<SyncState>>,
    repo: RepoId,
    action: GitActionKind,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(entry) = lock_state(&self.state).repos.get_mut(&self.repo) {
            entry.in_flight.set(self.action, false);
        }
    }
}

#[derive(Debug, Clone)]
struct EventSink {
    workspace: WorkspaceId,
    sender: broadcast::Sender<Event>,
    log: Option<JsonlEventLog>,
    sequence: Arc<AtomicU64>,
}

impl EventSink {
    fn emit(&self, repo: Option<&RepoId>, kind: EventKind) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event = Event {
            id: EventId(format!("{}-{sequence}", self.workspace)),
            workspace_id: self.workspace.clone(),
            repo_id: repo.cloned(),
            at: Utc::now(),
            kind,
        };
        if let Some(log) = &self.log {
            if let Err(err) = log.append_both(&event) {
                tracing::warn!(workspace = %self.workspace, error = %err, "failed to append event log");
            }
        }
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

pub struct GitActionOrchestrator<G> {
    workspace: WorkspaceId,
    ops: Arc<G>,
    config: SyncConfig,
    state: Arc<Mutex<SyncState>>,
    pulses: SuccessPulses,
    events: EventSink,
}

impl<G: GitOperations> GitActionOrchestrator<G> {
    pub fn new(workspace: WorkspaceId, ops: Arc<G>, config: SyncConfig) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let pulses = SuccessPulses::new(config.timing.success_pulse());
        Self {
            events: EventSink {
                workspace: workspace.clone(),
                sender,
                log: None,
                sequence: Arc::new(AtomicU64::new(0)),
            },
            workspace,
            ops,
            config,
            state: Arc::new(Mutex::new(SyncState::default())),
            pulses,
        }
    }

    pub fn with_event_log(mut self, log: JsonlEventLog) -> Self {
        self.events.log = Some(log);
        self
    }

    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.sender.subscribe()
    }

    /// Replaces all derived state with what `statuses` reports. Repositories
    /// missing from the refresh are forgotten unless an action is in flight.
    pub fn apply_status_refresh(&self, statuses: &[RepoBranchStatus]) {
        let mut transitions = Vec::new();
        let mut forgotten = Vec::new();
        {
            let mut state = lock_state(&self.state);
            for repo in statuses {
                if !repo.status.conflict_invariant_holds() {
                    tracing::warn!(
                        workspace = %self.workspace,
                        repo = %repo.repo_id,
                        conflict_op = ?repo.status.conflict_op,
                        conflicted_files = repo.status.conflicted_files.len(),
                        "branch status reports inconsistent conflict state"
                    );
                }

                let aggregated = aggregate(repo);
                let entry = state
                    .repos
                    .entry(repo.repo_id.clone())
                    .or_insert_with(|| RepoEntry {
                        status: aggregated.clone(),
                        in_flight: InFlightFlags::default(),
                        conflict: ConflictController::new(
                            repo.repo_id.clone(),
                            repo.repo_name.clone(),
                        ),
                        last_errors: HashMap::new(),
                    });
                entry.status = aggregated;
                match entry.conflict.observe(&entry.status) {
                    ConflictTransition::Entered => transitions.push((
                        repo.repo_id.clone(),
                        EventKind::ConflictDetected {
                            op: entry.status.conflict_op,
                            files: entry.status.status.conflicted_files.clone(),
                        },
                    )),
                    ConflictTransition::Cleared => {
                        transitions.push((repo.repo_id.clone(), EventKind::ConflictCleared))
                    }
                    ConflictTransition::Unchanged => {}
                }
            }

            state.repos.retain(|repo_id, entry| {
                let keep = statuses.iter().any(|repo| &repo.repo_id == repo_id)
                    || entry.in_flight.any();
                if !keep {
                    forgotten.push(repo_id.clone());
                }
                keep
            });
            state.latest = statuses.to_vec();
        }

        for repo_id in &forgotten {
            self.pulses.cancel_repo(repo_id);
        }
        for (repo_id, kind) in transitions {
            self.events.emit(Some(&repo_id), kind);
        }
        tracing::debug!(
            workspace = %self.workspace,
            repos = statuses.len(),
            forgotten = forgotten.len(),
            "branch status refreshed"
        );
    }

    pub async fn refresh_from<S>(&self, source: &S) -> Result<(), GitOpsError>
    where
        S: BranchStatusSource + ?Sized,
    {
        let statuses = source.branch_status(&self.workspace).await?;
        self.apply_status_refresh(&statuses);
        Ok(())
    }

    pub fn apply_process_refresh(&self, processes: &[ExecutionProcess]) {
        self.set_attempt_running(is_attempt_running(processes));
    }

    pub fn set_attempt_running(&self, running: bool) {
        lock_state(&self.state).attempt_running = running;
    }

    pub fn gates(&self, repo: &RepoId) -> Option<GitActionGates> {
        let state = lock_state(&self.state);
        let entry = state.repos.get(repo)?;
        Some(self.evaluate(repo, entry, state.attempt_running))
    }

    /// Gates for the selected repository, falling back to the first one.
    pub fn selected_gates(&self, selected: Option<&RepoId>) -> Option<(RepoId, GitActionGates)> {
        let state = lock_state(&self.state);
        let repo_id = select_repo_status(&state.latest, selected)?.repo_id.clone();
        let entry = state.repos.get(&repo_id)?;
        let gates = self.evaluate(&repo_id, entry, state.attempt_running);
        Some((repo_id, gates))
    }

    fn evaluate(&self, repo: &RepoId, entry: &RepoEntry, attempt_running: bool) -> GitActionGates {
        let pulses = self.pulses.active_for(repo);
        evaluate_gates(
            &GateInput {
                status: &entry.status,
                attempt_running,
                in_flight: entry.in_flight,
                pulses: &pulses,
            },
            &self.config.labels,
        )
    }

    pub fn conflict_snapshot(
        &self,
        repo: &RepoId,
        resolution_instructions: Option<&str>,
    ) -> Option<ConflictSnapshot> {
        lock_state(&self.state).repos.get(repo).map(|entry| {
            entry
                .conflict
                .snapshot(resolution_instructions, &self.config.conflict)
        })
    }

    /// One snapshot per conflicted repository, in binding order.
    pub fn conflict_snapshots(&self) -> Vec<ConflictSnapshot> {
        let state = lock_state(&self.state);
        conflicted_repos(&state.latest)
            .iter()
            .filter_map(|repo| state.repos.get(&repo.repo_id))
            .map(|entry| entry.conflict.snapshot(None, &self.config.conflict))
            .collect()
    }

    pub fn in_flight(&self, repo: &RepoId) -> Option<InFlightFlags> {
        lock_state(&self.state)
            .repos
            .get(repo)
            .map(|entry| entry.in_flight)
    }

    pub fn last_error(&self, repo: &RepoId, action: GitActionKind) -> Option<String> {
        lock_state(&self.state)
            .repos
            .get(repo)
            .and_then(|entry| entry.last_errors.get(&action).cloned())
    }

    pub async fn merge(&self, repo: &RepoId) -> ActionOutcome {
        let call = async { self.ops.merge(&self.workspace, repo).await.map(|()| None) };
        self.dispatch(repo, GitActionKind::Merge, call).await
    }

    /// Pushes new commits into the repository's open PR.
    pub async fn push(&self, repo: &RepoId) -> ActionOutcome {
        let call = async { self.ops.push(&self.workspace, repo).await.map(|()| None) };
        self.dispatch(repo, GitActionKind::Push, call).await
    }

    pub async fn create_pr(&self, request: &CreatePrRequest) -> ActionOutcome {
        let call = async { self.ops.create_pr(&self.workspace, request).await.map(Some) };
        self.dispatch(&request.repo_id, GitActionKind::CreatePr, call)
            .await
    }

    pub async fn rebase(&self, request: &RebaseRequest) -> ActionOutcome {
        let call = async { self.ops.rebase(&self.workspace, request).await.map(|()| None) };
        self.dispatch(&request.repo_id, GitActionKind::Rebase, call)
            .await
    }

    pub async fn change_target_branch(&self, repo: &RepoId, new_target_branch: &str) -> ActionOutcome {
        let call = async {
            self.ops
                .change_target_branch(&self.workspace, repo, new_target_branch)
                .await
                .map(|()| None)
        };
        self.dispatch(repo, GitActionKind::ChangeTargetBranch, call)
            .await
    }

    pub async fn abort_conflicts(&self, repo: &RepoId) -> ActionOutcome {
        let action = GitActionKind::AbortConflicts;
        let claimed = {
            let mut state = lock_state(&self.state);
            match state.repos.get_mut(repo) {
                None => Err(vec![ActionBlockReason::UnknownRepository]),
                Some(entry) => match entry.conflict.try_begin_abort() {
                    Ok(guard) => {
                        entry.in_flight.set(action, true);
                        entry.last_errors.remove(&action);
                        Ok(guard)
                    }
                    Err(AbortRejection::NotConflicted) => {
                        Err(vec![ActionBlockReason::NotConflicted])
                    }
                    Err(AbortRejection::AlreadyPending) => {
                        Err(vec![ActionBlockReason::OperationInFlight])
                    }
                },
            }
        };
        let abort_guard = match claimed {
            Ok(guard) => guard,
            Err(reasons) => return self.reject(repo, action, reasons),
        };
        let pending = PendingGuard {
            state: Arc::clone(&self.state),
            repo: repo.clone(),
            action,
        };

        self.events
            .emit(Some(repo), EventKind::ActionStarted { action });
        tracing::info!(workspace = %self.workspace, repo = %repo, "aborting conflicts");
        let result = self.ops.abort_conflicts(&self.workspace, repo).await;
        drop(pending);

        let message = result.as_ref().err().map(GitOpsError::user_message);
        {
            let mut state = lock_state(&self.state);
            if let Some(entry) = state.repos.get_mut(repo) {
                entry
                    .conflict
                    .finish_abort(abort_guard, message.clone().map_or(Ok(()), Err));
                if let Some(message) = &message {
                    entry.last_errors.insert(action, message.clone());
                }
            }
        }

        match message {
            None => {
                tracing::info!(workspace = %self.workspace, repo = %repo, "conflicts aborted");
                self.events
                    .emit(Some(repo), EventKind::ActionSucceeded { action });
                self.events.emit(Some(repo), EventKind::ConflictCleared);
                ActionOutcome::Succeeded { pr_url: None }
            }
            Some(message) => {
                tracing::warn!(workspace = %self.workspace, repo = %repo, error = %message, "abort failed");
                self.events.emit(
                    Some(repo),
                    EventKind::ActionFailed {
                        action,
                        message: message.clone(),
                    },
                );
                ActionOutcome::Failed { message }
            }
        }
    }

    /// Publishes the outcome of a restore dialog. The reset itself is
    /// performed by whoever consumes the decision.
    pub fn record_restore_decision(&self, decision: &RestoreDecision) {
        let kind = match *decision {
            RestoreDecision::Confirmed {
                perform_git_reset,
                force_when_dirty,
            } => EventKind::RestoreConfirmed {
                perform_git_reset,
                force_when_dirty,
            },
            RestoreDecision::Canceled => EventKind::RestoreCanceled,
        };
        self.events.emit(None, kind);
    }

    /// Cancels pending success windows. Call when the workspace view closes.
    pub fn teardown(&self) {
        self.pulses.cancel_all();
        tracing::debug!(workspace = %self.workspace, "orchestrator torn down");
    }

    async fn dispatch<F>(&self, repo: &RepoId, action: GitActionKind, call: F) -> ActionOutcome
    where
        F: Future<Output = Result<Option<String>, GitOpsError>>,
    {
        let pending = match self.begin(repo, action) {
            Ok(pending) => pending,
            Err(reasons) => return self.reject(repo, action, reasons),
        };

        self.events
            .emit(Some(repo), EventKind::ActionStarted { action });
        tracing::info!(workspace = %self.workspace, repo = %repo, action = %action, "dispatching git action");
        let result = call.await;
        drop(pending);

        match result {
            Ok(pr_url) => {
                tracing::info!(workspace = %self.workspace, repo = %repo, action = %action, "git action succeeded");
                let sink = self.events.clone();
                let pulse_repo = repo.clone();
                self.pulses.start(repo, action, move || {
                    sink.emit(Some(&pulse_repo), EventKind::SuccessPulseExpired { action });
                });
                self.events
                    .emit(Some(repo), EventKind::ActionSucceeded { action });
                ActionOutcome::Succeeded { pr_url }
            }
            Err(err) => {
                let message = err.user_message();
                match err.conflict_op() {
                    Some(op) => tracing::warn!(
                        workspace = %self.workspace,
                        repo = %repo,
                        action = %action,
                        conflict_op = %op,
                        "git action stopped with conflicts; awaiting status refresh"
                    ),
                    None => tracing::warn!(workspace = %self.workspace, repo = %repo, action = %action, error = %err, "git action failed"),
                }
                if let Some(entry) = lock_state(&self.state).repos.get_mut(repo) {
                    entry.last_errors.insert(action, message.clone());
                }
                self.events.emit(
                    Some(repo),
                    EventKind::ActionFailed {
                        action,
                        message: message.clone(),
                    },
                );
                ActionOutcome::Failed { message }
            }
        }
    }

    fn begin(
        &self,
        repo: &RepoId,
        action: GitActionKind,
    ) -> Result<PendingGuard, Vec<ActionBlockReason>> {
        let mut state = lock_state(&self.state);
        let attempt_running = state.attempt_running;
        let Some(entry) = state.repos.get_mut(repo) else {
            return Err(vec![ActionBlockReason::UnknownRepository]);
        };

        let gates = self.evaluate(repo, entry, attempt_running);
        let Some(gate) = gates.for_action(action) else {
            let reason = match action {
                GitActionKind::Push => ActionBlockReason::NoOpenPr,
                _ => ActionBlockReason::HasOpenPr,
            };
            return Err(vec![reason]);
        };
        if !gate.enabled {
            return Err(gate.reasons.clone());
        }

        entry.in_flight.set(action, true);
        entry.last_errors.remove(&action);
        Ok(PendingGuard {
            state: Arc::clone(&self.state),
            repo: repo.clone(),
            action,
        })
    }

    fn reject(
        &self,
        repo: &RepoId,
        action: GitActionKind,
        reasons: Vec<ActionBlockReason>,
    ) -> ActionOutcome {
        tracing::debug!(workspace = %self.workspace, repo = %repo, action = %action, reasons = ?reasons, "git action rejected");
        self.events.emit(
            Some(repo),
            EventKind::ActionRejected {
                action,
                reasons: reasons.iter().map(|reason| reason.to_string()).collect(),
            },
        );
        ActionOutcome::Rejected { reasons }
    }
}
