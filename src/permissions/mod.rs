//! Tool-call permissions
//!
//! Every tool invocation the agent proposes is decided here:
//! - **Rules**: `Tool`, `Bash(cmd)`, `Bash(cmd *)` and `Read(glob)` strings
//!   compiled into typed matchers
//! - **Safe Zone**: canonical directories file mutations may touch without
//!   asking; symlinks are resolved before the check
//! - **Classifier**: commands and paths that may never get a persistent
//!   "don't ask again" rule
//! - **Grants**: extra rules living only for one turn
//! - **Engine**: the deterministic deny → allow → ask decision
//!
//! ## Example
//!
//! ```rust,ignore
//! use shadow_gatekeeper::config::{SettingsFiles, SnapshotStore};
//! use shadow_gatekeeper::permissions::{AuthorizationEngine, PermissionMode, TemporaryGrantStore};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(SettingsFiles::for_workdir(&workdir));
//! let store = Arc::new(SnapshotStore::open(&workdir, backend)?);
//! let engine = AuthorizationEngine::new(store, Arc::new(TemporaryGrantStore::new()));
//!
//! let request = engine.request("Bash", json!({"command": "git status"}), PermissionMode::Default);
//! match engine.decide(&request) {
//!     Decision::Allow => { /* execute */ }
//!     Decision::Ask { .. } => { /* prompt user */ }
//!     Decision::Deny { reason, .. } => { /* report to agent */ }
//! }
//! ```

pub mod classifier;
pub mod engine;
pub mod grants;
pub mod mode;
pub mod rule;
pub mod safe_zone;

pub use classifier::{
    classify, expand_to_persistable_rule, should_hide_persistent_option, Classification,
};
pub use engine::{
    check_permission, Audience, AuthorizationEngine, Decision, DecisionRequest, PersistOutcome,
    FILE_MUTATION_TOOLS, RESTRICTED_TOOLS,
};
pub use grants::{
    current_cycle_id, new_cycle_id, within_cycle, CycleGuard, TemporaryGrant, TemporaryGrantStore,
};
pub use mode::PermissionMode;
pub use rule::{compile_all, CommandSegment, PermissionRule};
pub use safe_zone::{build_safe_zone, is_in_safe_zone, resolve_real_path, SafeZone};
