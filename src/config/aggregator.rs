//! Scope aggregation
//!
//! Merges the user, project and local settings into one immutable
//! [`RuleSnapshot`]. Rule lists are unioned; single-valued settings are taken
//! from the most specific scope that sets them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::settings::{ScopeInputs, ScopeSettings};
use crate::permissions::{PermissionMode, PermissionRule, SafeZone};

/// Everything the authorization engine needs from configuration
///
/// Built once per reload and shared behind an `Arc`; never mutated.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    /// Allow rules from every scope, de-duplicated
    pub allow: Vec<PermissionRule>,
    /// Deny rules from every scope, de-duplicated
    pub deny: Vec<PermissionRule>,
    /// Mode a new session starts in
    pub default_mode: PermissionMode,
    /// Resolved Safe Zone (always contains the working directory)
    pub safe_zone: SafeZone,
    /// Plugin switches, most specific scope wins per plugin
    pub enabled_plugins: BTreeMap<String, bool>,
    /// Monotonic snapshot number
    pub version: u64,
    /// When this snapshot was built
    pub built_at: DateTime<Utc>,
}

impl RuleSnapshot {
    /// Snapshot with no rules, for a working directory
    pub fn empty(workdir: &Path) -> Self {
        merge(&ScopeInputs::default(), workdir, 0)
    }

    /// Resolved Safe Zone directories
    pub fn safe_zone_dirs(&self) -> &[PathBuf] {
        self.safe_zone.dirs()
    }

    /// Whether a plugin is enabled (unknown plugins are not)
    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.enabled_plugins.get(name).copied().unwrap_or(false)
    }

    /// Whether both snapshots hold the same rules and settings
    pub fn same_rules(&self, other: &RuleSnapshot) -> bool {
        self.allow == other.allow
            && self.deny == other.deny
            && self.default_mode == other.default_mode
            && self.safe_zone == other.safe_zone
            && self.enabled_plugins == other.enabled_plugins
    }
}

/// Merge three scopes into a snapshot
pub fn merge(inputs: &ScopeInputs, workdir: &Path, version: u64) -> RuleSnapshot {
    let allow = compile_union(inputs, |s| &s.permissions.allow);
    let deny = compile_union(inputs, |s| &s.permissions.deny);

    let default_mode = most_specific(inputs, |s| s.permissions.default_mode).unwrap_or_default();

    let additional_dirs = most_specific(inputs, |s| s.permissions.additional_directories.clone())
        .unwrap_or_default();
    let safe_zone = SafeZone::build(workdir, &additional_dirs);

    let mut enabled_plugins = BTreeMap::new();
    for settings in inputs.ordered() {
        if let Some(plugins) = &settings.enabled_plugins {
            for (name, enabled) in plugins {
                enabled_plugins.insert(name.clone(), *enabled);
            }
        }
    }

    tracing::debug!(
        "[Aggregator] Built snapshot v{}: {} allow, {} deny, mode {}, {} safe dirs",
        version,
        allow.len(),
        deny.len(),
        default_mode,
        safe_zone.dirs().len()
    );

    RuleSnapshot {
        allow,
        deny,
        default_mode,
        safe_zone,
        enabled_plugins,
        version,
        built_at: Utc::now(),
    }
}

fn compile_union<F>(inputs: &ScopeInputs, rules: F) -> Vec<PermissionRule>
where
    F: Fn(&ScopeSettings) -> &Vec<String>,
{
    let mut compiled: Vec<PermissionRule> = Vec::new();
    for settings in inputs.ordered() {
        for raw in rules(settings) {
            let rule = PermissionRule::compile(raw);
            if rule.is_invalid() || compiled.contains(&rule) {
                continue;
            }
            compiled.push(rule);
        }
    }
    compiled
}

/// First value set by local, then project, then user
fn most_specific<T, F>(inputs: &ScopeInputs, field: F) -> Option<T>
where
    F: Fn(&ScopeSettings) -> Option<T>,
{
    [&inputs.local, &inputs.project, &inputs.user]
        .into_iter()
        .flatten()
        .find_map(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn workdir() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let workdir = root.join("proj");
        fs::create_dir_all(&workdir).unwrap();
        for dir in ["user-dir", "project-dir", "local-dir"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        (tmp, workdir)
    }

    #[test]
    fn test_rules_are_unioned_and_deduplicated() {
        let (_tmp, workdir) = workdir();
        let inputs = ScopeInputs {
            user: Some(ScopeSettings::with_rules(["Bash(git status)", "Read"], ["Bash(rm *)"])),
            project: Some(ScopeSettings::with_rules(["Bash(git status)"], ["Bash(rm  *)"])),
            local: Some(ScopeSettings::with_rules(["  Read  ", "Bash(oops"], [])),
        };

        let snapshot = merge(&inputs, &workdir, 1);
        assert_eq!(
            snapshot.allow,
            vec![
                PermissionRule::compile("Bash(git status)"),
                PermissionRule::compile("Read")
            ]
        );
        assert_eq!(snapshot.deny.len(), 2);
        assert!(snapshot.deny[0].matches("Bash", &json!({ "command": "rm -rf x" })));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (_tmp, workdir) = workdir();
        let inputs = ScopeInputs {
            user: Some(ScopeSettings::with_rules(["Bash", "Bash"], ["Read(**/.env)"])),
            project: None,
            local: Some(ScopeSettings::with_rules(["Bash"], ["Read(**/.env)"])),
        };

        let first = merge(&inputs, &workdir, 1);
        let second = merge(&inputs, &workdir, 2);
        assert!(first.same_rules(&second));
        assert_eq!(first.allow.len(), 1);
        assert_eq!(first.deny.len(), 1);
    }

    #[test]
    fn test_default_mode_precedence() {
        let (_tmp, workdir) = workdir();
        let mut inputs = ScopeInputs {
            user: Some(
                ScopeSettings::default().with_default_mode(PermissionMode::BypassPermissions),
            ),
            project: Some(ScopeSettings::default().with_default_mode(PermissionMode::AcceptEdits)),
            local: Some(ScopeSettings::default()),
        };
        assert_eq!(
            merge(&inputs, &workdir, 1).default_mode,
            PermissionMode::AcceptEdits
        );

        inputs.project = None;
        assert_eq!(
            merge(&inputs, &workdir, 1).default_mode,
            PermissionMode::BypassPermissions
        );

        assert_eq!(
            merge(&ScopeInputs::default(), &workdir, 1).default_mode,
            PermissionMode::Default
        );
    }

    #[test]
    fn test_additional_directories_override_not_union() {
        let (_tmp, workdir) = workdir();
        let root = workdir.parent().unwrap().to_path_buf();
        let mut inputs = ScopeInputs {
            user: Some(ScopeSettings::default().with_additional_directories(["../user-dir"])),
            project: Some(ScopeSettings::default().with_additional_directories(["../project-dir"])),
            local: Some(ScopeSettings::default().with_additional_directories(["../local-dir"])),
        };

        let snapshot = merge(&inputs, &workdir, 1);
        assert_eq!(
            snapshot.safe_zone_dirs(),
            &[workdir.clone(), root.join("local-dir")]
        );

        inputs.local = Some(ScopeSettings::default());
        let snapshot = merge(&inputs, &workdir, 1);
        assert_eq!(
            snapshot.safe_zone_dirs(),
            &[workdir.clone(), root.join("project-dir")]
        );

        inputs.local =
            Some(ScopeSettings::default().with_additional_directories(Vec::<String>::new()));
        let snapshot = merge(&inputs, &workdir, 1);
        assert_eq!(snapshot.safe_zone_dirs(), &[workdir.clone()]);
    }

    #[test]
    fn test_enabled_plugins_last_write_per_key() {
        let (_tmp, workdir) = workdir();
        let inputs = ScopeInputs {
            user: Some(
                ScopeSettings::default()
                    .with_plugin("fmt", true)
                    .with_plugin("lint", true)
                    .with_plugin("docs", true),
            ),
            project: Some(ScopeSettings::default().with_plugin("lint", false)),
            local: Some(
                ScopeSettings::default()
                    .with_plugin("docs", false)
                    .with_plugin("extra", true),
            ),
        };

        let snapshot = merge(&inputs, &workdir, 1);
        assert!(snapshot.is_plugin_enabled("fmt"));
        assert!(!snapshot.is_plugin_enabled("lint"));
        assert!(!snapshot.is_plugin_enabled("docs"));
        assert!(snapshot.is_plugin_enabled("extra"));
        assert!(!snapshot.is_plugin_enabled("unknown"));
    }

    #[test]
    fn test_empty_snapshot_contains_workdir() {
        let (_tmp, workdir) = workdir();
        let snapshot = RuleSnapshot::empty(&workdir);
        assert!(snapshot.allow.is_empty());
        assert!(snapshot.deny.is_empty());
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.safe_zone_dirs(), &[workdir]);
    }
}
