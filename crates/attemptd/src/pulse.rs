//! Timed "just succeeded" windows, one per (repository, action).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;

use attempt_core::state::GitActionKind;
use attempt_core::types::RepoId;

use crate::action_gate::ActivePulses;

type PulseKey = (RepoId, GitActionKind);

#[derive(Debug, Default)]
struct PulseTable {
    next_generation: u64,
    entries: HashMap<PulseKey, (u64, AbortHandle)>,
}

/// Scheduled pulse expiries. Restarting a pulse replaces the previous timer;
/// cancelled timers never fire their callback. Dropping the set cancels all.
#[derive(Debug)]
pub struct SuccessPulses {
    window: Duration,
    table: Arc<Mutex<PulseTable>>,
}

fn lock(table: &Mutex<PulseTable>) -> MutexGuard<'_, PulseTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SuccessPulses {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            table: Arc::new(Mutex::new(PulseTable::default())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Must be called from within a tokio runtime. `on_expire` runs once the
    /// window elapses, unless the pulse was restarted or cancelled first.
    pub fn start<F>(&self, repo: &RepoId, action: GitActionKind, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.window.is_zero() {
            return;
        }

        let key = (repo.clone(), action);
        let mut table = lock(&self.table);
        table.next_generation += 1;
        let generation = table.next_generation;

        let shared = Arc::clone(&self.table);
        let window = self.window;
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let expired = {
                let mut table = lock(&shared);
                match table.entries.get(&timer_key) {
                    Some((current, _)) if *current == generation => {
                        table.entries.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                on_expire();
            }
        })
        .abort_handle();

        if let Some((_, previous)) = table.entries.insert(key, (generation, handle)) {
            previous.abort();
        }
    }

    pub fn is_active(&self, repo: &RepoId, action: GitActionKind) -> bool {
        lock(&self.table)
            .entries
            .contains_key(&(repo.clone(), action))
    }

    pub fn active_for(&self, repo: &RepoId) -> ActivePulses {
        lock(&self.table)
            .entries
            .keys()
            .filter(|(pulse_repo, _)| pulse_repo == repo)
            .map(|(_, action)| *action)
            .collect()
    }

    pub fn cancel_repo(&self, repo: &RepoId) {
        lock(&self.table).entries.retain(|(pulse_repo, _), (_, handle)| {
            if pulse_repo == repo {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&self) {
        for (_, (_, handle)) in lock(&self.table).entries.drain() {
            handle.abort();
        }
    }
}

impl Drop for SuccessPulses {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::SuccessPulses;
    use attempt_core::state::GitActionKind;
    use attempt_core::types::RepoId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&count);
        (count, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_expires_after_window() {
        let pulses = SuccessPulses::new(Duration::from_millis(2000));
        let repo = RepoId::new("api");
        let (fired, on_expire) = counter();

        pulses.start(&repo, GitActionKind::Merge, on_expire);
        assert!(pulses.is_active(&repo, GitActionKind::Merge));
        assert!(pulses.active_for(&repo).is_active(GitActionKind::Merge));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(pulses.is_active(&repo, GitActionKind::Merge));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pulses.is_active(&repo, GitActionKind::Merge));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_previous_timer() {
        let pulses = SuccessPulses::new(Duration::from_millis(2000));
        let repo = RepoId::new("api");
        let (first, first_hook) = counter();
        let (second, second_hook) = counter();

        pulses.start(&repo, GitActionKind::Push, first_hook);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        pulses.start(&repo, GitActionKind::Push, second_hook);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(pulses.is_active(&repo, GitActionKind::Push));
        assert_eq!(first.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pulses_never_fire() {
        let pulses = SuccessPulses::new(Duration::from_millis(2000));
        let api = RepoId::new("api");
        let web = RepoId::new("web");
        let (api_fired, api_hook) = counter();
        let (web_fired, web_hook) = counter();

        pulses.start(&api, GitActionKind::Rebase, api_hook);
        pulses.start(&web, GitActionKind::Rebase, web_hook);
        pulses.cancel_repo(&api);
        assert!(!pulses.is_active(&api, GitActionKind::Rebase));
        assert!(pulses.is_active(&web, GitActionKind::Rebase));

        drop(pulses);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(api_fired.load(Ordering::SeqCst), 0);
        assert_eq!(web_fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_window_disables_pulses() {
        let pulses = SuccessPulses::new(Duration::ZERO);
        let repo = RepoId::new("api");
        pulses.start(&repo, GitActionKind::Merge, || {});
        assert!(!pulses.is_active(&repo, GitActionKind::Merge));
    }
}
