//! Per-turn temporary grants
//!
//! A turn (one "cycle" of the agent answering a prompt) may carry extra allow
//! rules, e.g. the `allowed-tools` list of a slash command. These rules live
//! only as long as the cycle:
//! - they are shared by every tool call of the cycle, including parallel ones
//! - they are invisible to every other cycle
//! - they are released exactly once, when the [`CycleGuard`] is ended or dropped
//!
//! Dropping the guard covers errors, panics and cancelled futures alike.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::rule::PermissionRule;
use crate::core::{GatekeeperError, GatekeeperResult};

tokio::task_local! {
    static CURRENT_CYCLE: String;
}

/// Rules granted for one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryGrant {
    pub cycle_id: String,
    pub rules: Vec<PermissionRule>,
}

impl TemporaryGrant {
    /// Whether any granted rule matches the invocation
    pub fn matches(&self, tool_name: &str, input: &serde_json::Value) -> bool {
        self.rules.iter().any(|rule| rule.matches(tool_name, input))
    }
}

/// Active grants keyed by cycle id
#[derive(Debug, Default)]
pub struct TemporaryGrantStore {
    active: Arc<RwLock<HashMap<String, Arc<TemporaryGrant>>>>,
}

/// Keeps a cycle's grant alive; releases it when ended or dropped
#[derive(Debug)]
pub struct CycleGuard {
    cycle_id: String,
    active: Arc<RwLock<HashMap<String, Arc<TemporaryGrant>>>>,
    released: AtomicBool,
}

impl CycleGuard {
    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    /// Release the grant; only the first call has an effect
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let removed = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.cycle_id);
        if removed.is_some() {
            tracing::debug!("[Grants] Released cycle {}", self.cycle_id);
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl TemporaryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a cycle with its seed rules
    ///
    /// Seeds are compiled; invalid ones are dropped with a warning. Fails if
    /// the cycle id is already active.
    pub fn begin_cycle<S: AsRef<str>>(
        &self,
        cycle_id: impl Into<String>,
        seed_rules: &[S],
    ) -> GatekeeperResult<CycleGuard> {
        let cycle_id = cycle_id.into();
        let rules: Vec<PermissionRule> = super::rule::compile_all(seed_rules)
            .into_iter()
            .filter(|rule| !rule.is_invalid())
            .collect();

        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(&cycle_id) {
            return Err(GatekeeperError::CycleActive(cycle_id));
        }

        tracing::debug!(
            "[Grants] Cycle {} started with {} temporary rule(s)",
            cycle_id,
            rules.len()
        );
        active.insert(
            cycle_id.clone(),
            Arc::new(TemporaryGrant {
                cycle_id: cycle_id.clone(),
                rules,
            }),
        );

        Ok(CycleGuard {
            cycle_id,
            active: Arc::clone(&self.active),
            released: AtomicBool::new(false),
        })
    }

    /// End a cycle early. Idempotent.
    pub fn end_cycle(&self, guard: &CycleGuard) {
        guard.release();
    }

    /// Active grant for a cycle
    pub fn grant(&self, cycle_id: &str) -> Option<Arc<TemporaryGrant>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cycle_id)
            .cloned()
    }

    /// Rules granted to a cycle (empty when the cycle is not active)
    pub fn rules(&self, cycle_id: &str) -> Vec<PermissionRule> {
        self.grant(cycle_id)
            .map(|grant| grant.rules.clone())
            .unwrap_or_default()
    }

    /// Whether a cycle is active
    pub fn is_active(&self, cycle_id: &str) -> bool {
        self.grant(cycle_id).is_some()
    }

    /// Number of active cycles
    pub fn active_count(&self) -> usize {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run a turn inside a cycle scope
    ///
    /// The grant is released when the future completes, fails, panics or is
    /// dropped before completion.
    pub async fn run_cycle<S, F>(
        &self,
        cycle_id: impl Into<String>,
        seed_rules: &[S],
        turn: F,
    ) -> GatekeeperResult<F::Output>
    where
        S: AsRef<str>,
        F: Future,
    {
        let guard = self.begin_cycle(cycle_id, seed_rules)?;
        let output = CURRENT_CYCLE
            .scope(guard.cycle_id().to_string(), turn)
            .await;
        self.end_cycle(&guard);
        Ok(output)
    }
}

/// Cycle id of the running task, if it runs inside a cycle
pub fn current_cycle_id() -> Option<String> {
    CURRENT_CYCLE.try_with(|id| id.clone()).ok()
}

/// Run a future under an existing cycle id (e.g. a subagent spawned on another task)
pub async fn within_cycle<F: Future>(cycle_id: impl Into<String>, fut: F) -> F::Output {
    CURRENT_CYCLE.scope(cycle_id.into(), fut).await
}

/// Fresh cycle id
pub fn new_cycle_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn git_status() -> serde_json::Value {
        json!({ "command": "git status" })
    }

    #[test]
    fn test_begin_and_end_cycle() {
        let store = TemporaryGrantStore::new();
        let guard = store.begin_cycle("c1", &["Bash(git status)", "Bash(oops"]).unwrap();

        let grant = store.grant("c1").unwrap();
        assert_eq!(grant.rules.len(), 1);
        assert!(grant.matches("Bash", &git_status()));

        store.end_cycle(&guard);
        assert!(store.grant("c1").is_none());
        assert!(store.rules("c1").is_empty());

        // Second end and the drop are no-ops
        store.end_cycle(&guard);
        drop(guard);
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_duplicate_cycle_id_is_rejected() {
        let store = TemporaryGrantStore::new();
        let _guard = store.begin_cycle("dup", &["Read"]).unwrap();
        let err = store.begin_cycle("dup", &["Write"]).unwrap_err();
        assert!(matches!(err, GatekeeperError::CycleActive(id) if id == "dup"));
        // The original grant is untouched
        assert_eq!(store.rules("dup"), vec![PermissionRule::compile("Read")]);
    }

    #[test]
    fn test_cycles_are_isolated() {
        let store = TemporaryGrantStore::new();
        let _a = store.begin_cycle("a", &["Bash(git status)"]).unwrap();
        let _b = store.begin_cycle("b", &[] as &[&str]).unwrap();

        assert!(store.grant("a").unwrap().matches("Bash", &git_status()));
        assert!(!store.grant("b").unwrap().matches("Bash", &git_status()));
        assert!(store.grant("c").is_none());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let store = TemporaryGrantStore::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.begin_cycle("boom", &["Read"]).unwrap();
            panic!("tool crashed");
        }));
        assert!(result.is_err());
        assert!(!store.is_active("boom"));
    }

    #[tokio::test]
    async fn test_run_cycle_sets_task_local_and_releases() {
        let store = TemporaryGrantStore::new();
        assert_eq!(current_cycle_id(), None);

        let seen = store
            .run_cycle("turn-1", &["Bash(git status)"], async {
                let id = current_cycle_id();
                (id.clone(), store.is_active("turn-1"))
            })
            .await
            .unwrap();

        assert_eq!(seen, (Some("turn-1".to_string()), true));
        assert!(!store.is_active("turn-1"));
    }

    #[tokio::test]
    async fn test_run_cycle_releases_on_error() {
        let store = TemporaryGrantStore::new();
        let result: Result<(), String> = store
            .run_cycle("failing", &["Read"], async { Err("tool failed".to_string()) })
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(!store.is_active("failing"));
    }

    #[tokio::test]
    async fn test_cancelled_cycle_is_released() {
        let store = Arc::new(TemporaryGrantStore::new());
        let task_store = Arc::clone(&store);

        let handle = tokio::spawn(async move {
            task_store
                .run_cycle("cancelled", &["Read"], async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                })
                .await
        });

        for _ in 0..100 {
            if store.is_active("cancelled") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(store.is_active("cancelled"));

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(!store.is_active("cancelled"));
    }

    #[tokio::test]
    async fn test_parallel_calls_share_the_grant() {
        let store = Arc::new(TemporaryGrantStore::new());
        let inner = Arc::clone(&store);

        let results = store
            .run_cycle("parallel", &["Bash(git status)"], async move {
                let calls = (0..8).map(|_| {
                    let store = Arc::clone(&inner);
                    async move {
                        let id = current_cycle_id().unwrap();
                        store.grant(&id).unwrap().matches("Bash", &git_status())
                    }
                });
                futures::future::join_all(calls).await
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 8);
        assert!(results.into_iter().all(|allowed| allowed));
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn test_within_cycle_for_spawned_subagent() {
        let store = Arc::new(TemporaryGrantStore::new());
        let inner = Arc::clone(&store);

        let seen = store
            .run_cycle("parent", &["Read"], async move {
                let id = current_cycle_id().unwrap();
                let sub_store = Arc::clone(&inner);
                tokio::spawn(within_cycle(id, async move {
                    let id = current_cycle_id().unwrap();
                    sub_store.rules(&id)
                }))
                .await
                .unwrap()
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![PermissionRule::compile("Read")]);
    }

    #[test]
    fn test_new_cycle_ids_are_unique() {
        assert_ne!(new_cycle_id(), new_cycle_id());
    }
}
