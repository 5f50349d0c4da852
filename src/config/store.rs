//! Live rule snapshot
//!
//! Holds the current [`RuleSnapshot`] in an `ArcSwap` so that readers never
//! block and never see a half-applied reload. Reloads and rule persistence
//! are the only writers and are serialized behind one mutex.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use super::aggregator::{merge, RuleSnapshot};
use super::settings::{Scope, ScopeInputs, SettingsBackend};
use crate::core::GatekeeperResult;
use crate::permissions::PermissionRule;

/// Live-reloadable rule snapshot
pub struct SnapshotStore {
    current: ArcSwap<RuleSnapshot>,
    backend: Arc<dyn SettingsBackend>,
    workdir: PathBuf,
    /// Last inputs that loaded successfully; the lock is the writer lock
    writer: Mutex<ScopeInputs>,
}

impl SnapshotStore {
    /// Load all scopes and build the first snapshot
    pub fn open(
        workdir: impl Into<PathBuf>,
        backend: Arc<dyn SettingsBackend>,
    ) -> GatekeeperResult<Self> {
        let workdir = workdir.into();
        let inputs = backend.load_all()?;
        let snapshot = merge(&inputs, &workdir, 1);
        tracing::info!(
            "[Store] Loaded rules for {} ({} allow, {} deny)",
            workdir.display(),
            snapshot.allow.len(),
            snapshot.deny.len()
        );

        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            backend,
            workdir,
            writer: Mutex::new(inputs),
        })
    }

    /// Current snapshot. Lock-free.
    pub fn load(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Version of the current snapshot
    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Working directory the snapshots are built for
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Re-read every scope and swap in a new snapshot
    ///
    /// If any scope fails to load, the previous snapshot stays active and the
    /// error is returned.
    pub fn reload(&self) -> GatekeeperResult<Arc<RuleSnapshot>> {
        let mut inputs = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let fresh = match self.backend.load_all() {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::error!(
                    "[Store] Reload rejected, keeping snapshot v{}: {}",
                    self.version(),
                    e
                );
                return Err(e);
            }
        };

        *inputs = fresh;
        let snapshot = self.swap_in(&inputs);
        tracing::info!("[Store] Rules reloaded (v{})", snapshot.version);
        Ok(snapshot)
    }

    /// Append an allow rule to a scope and swap in a snapshot that includes it
    pub fn persist_allow_rule(
        &self,
        scope: Scope,
        rule: &PermissionRule,
    ) -> GatekeeperResult<Arc<RuleSnapshot>> {
        let mut inputs = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let rule_string = rule.to_string();

        self.backend.append_allow_rule(scope, &rule_string)?;

        match self.backend.load_all() {
            Ok(fresh) => *inputs = fresh,
            Err(e) => {
                // The rule is stored; apply it to the last good inputs so it takes effect now
                tracing::warn!(
                    "[Store] Could not re-read settings after persisting {}: {}",
                    rule_string,
                    e
                );
                let mut settings = inputs.get(scope).cloned().unwrap_or_default();
                settings.push_allow_rule(&rule_string);
                inputs.set(scope, Some(settings));
            }
        }

        let snapshot = self.swap_in(&inputs);
        tracing::info!(
            "[Store] Persisted {} to {} scope (v{})",
            rule_string,
            scope,
            snapshot.version
        );
        Ok(snapshot)
    }

    /// Build and publish a snapshot; caller holds the writer lock
    fn swap_in(&self, inputs: &ScopeInputs) -> Arc<RuleSnapshot> {
        let version = self.current.load().version + 1;
        let snapshot = Arc::new(merge(inputs, &self.workdir, version));
        self.current.store(Arc::clone(&snapshot));
        tracing::debug!(
            "[Store] Snapshot v{} built at {}",
            snapshot.version,
            snapshot.built_at.to_rfc3339()
        );
        snapshot
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("workdir", &self.workdir)
            .field("version", &self.version())
            .finish()
    }
}
