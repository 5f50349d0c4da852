//! Configuration
//!
//! Three settings scopes feed one immutable rule snapshot:
//! - **User**: `$HOME/.shadow/settings.json`
//! - **Project**: `<workdir>/.shadow/settings.json`
//! - **Local**: `<workdir>/.shadow/settings.local.json`
//!
//! Allow and deny lists are unioned across scopes; `defaultMode`,
//! `additionalDirectories` and each `enabledPlugins` key are taken from the
//! most specific scope that sets them (local, then project, then user).
//!
//! The [`SnapshotStore`] publishes the merged snapshot. A reload that fails
//! keeps the previous snapshot in place.

pub mod aggregator;
pub mod settings;
pub mod store;

pub use aggregator::{merge, RuleSnapshot};
pub use settings::{
    MemorySettings, PermissionSettings, Scope, ScopeInputs, ScopeSettings, SettingsBackend,
    SettingsFiles,
};
pub use store::SnapshotStore;
