//! Scope settings
//!
//! Typed view of the three settings files (user, project, local) and the
//! backends that read them and append persisted rules to them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::core::{GatekeeperError, GatekeeperResult};
use crate::permissions::PermissionMode;

/// Directory holding settings files, under `$HOME` and under the project
pub const SETTINGS_DIR: &str = ".shadow";
/// Shared settings file name (user and project scopes)
pub const SETTINGS_FILE: &str = "settings.json";
/// Uncommitted per-checkout settings file name
pub const LOCAL_SETTINGS_FILE: &str = "settings.local.json";

/// A configuration source
///
/// Single-valued settings resolve `Local > Project > User`; rule lists are
/// unioned across all scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// `$HOME/.shadow/settings.json`
    User,
    /// `<workdir>/.shadow/settings.json`
    Project,
    /// `<workdir>/.shadow/settings.local.json`
    Local,
}

impl Scope {
    /// All scopes, lowest precedence first
    pub const ALL: [Scope; 3] = [Scope::User, Scope::Project, Scope::Local];
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::User => write!(f, "user"),
            Scope::Project => write!(f, "project"),
            Scope::Local => write!(f, "local"),
        }
    }
}

/// Contents of one settings file
///
/// Keys this crate does not know about are kept so that rewriting a file to
/// append a rule does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSettings {
    #[serde(default)]
    pub permissions: PermissionSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_plugins: Option<BTreeMap<String, bool>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `permissions` block of a settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_mode"
    )]
    pub default_mode: Option<PermissionMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_directories: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An unknown mode name is ignored rather than failing the whole file
fn lenient_mode<'de, D>(deserializer: D) -> Result<Option<PermissionMode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match serde_json::from_value(value.clone()) {
        Ok(mode) => Some(mode),
        Err(_) => {
            tracing::warn!("[Settings] Ignoring unknown defaultMode {}", value);
            None
        }
    }))
}

impl ScopeSettings {
    /// Parse settings from JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Settings with only allow/deny rules
    pub fn with_rules<S: Into<String>>(
        allow: impl IntoIterator<Item = S>,
        deny: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            permissions: PermissionSettings {
                allow: allow.into_iter().map(Into::into).collect(),
                deny: deny.into_iter().map(Into::into).collect(),
                ..PermissionSettings::default()
            },
            ..Self::default()
        }
    }

    /// Set the default mode
    pub fn with_default_mode(mut self, mode: PermissionMode) -> Self {
        self.permissions.default_mode = Some(mode);
        self
    }

    /// Set the additional Safe Zone directories
    pub fn with_additional_directories<S: Into<String>>(
        mut self,
        dirs: impl IntoIterator<Item = S>,
    ) -> Self {
        self.permissions.additional_directories = Some(dirs.into_iter().map(Into::into).collect());
        self
    }

    /// Enable or disable a plugin
    pub fn with_plugin(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.enabled_plugins
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), enabled);
        self
    }

    /// Append an allow rule unless the exact string is already present
    ///
    /// Returns whether the rule was added.
    pub fn push_allow_rule(&mut self, rule: &str) -> bool {
        if self.permissions.allow.iter().any(|r| r == rule) {
            return false;
        }
        self.permissions.allow.push(rule.to_string());
        true
    }
}

/// The settings of all three scopes, as read at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeInputs {
    pub user: Option<ScopeSettings>,
    pub project: Option<ScopeSettings>,
    pub local: Option<ScopeSettings>,
}

impl ScopeInputs {
    /// Settings for one scope
    pub fn get(&self, scope: Scope) -> Option<&ScopeSettings> {
        match scope {
            Scope::User => self.user.as_ref(),
            Scope::Project => self.project.as_ref(),
            Scope::Local => self.local.as_ref(),
        }
    }

    /// Replace the settings for one scope
    pub fn set(&mut self, scope: Scope, settings: Option<ScopeSettings>) {
        match scope {
            Scope::User => self.user = settings,
            Scope::Project => self.project = settings,
            Scope::Local => self.local = settings,
        }
    }

    /// Present scopes, lowest precedence first
    pub fn ordered(&self) -> impl Iterator<Item = &ScopeSettings> {
        [&self.user, &self.project, &self.local]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

/// Where scope settings come from and where persisted rules go
pub trait SettingsBackend: Send + Sync {
    /// Read one scope; `Ok(None)` when the scope has no settings
    fn load(&self, scope: Scope) -> GatekeeperResult<Option<ScopeSettings>>;

    /// Append a rule string to a scope's `permissions.allow`
    fn append_allow_rule(&self, scope: Scope, rule: &str) -> GatekeeperResult<()>;

    /// Read all scopes; fails if any scope fails
    fn load_all(&self) -> GatekeeperResult<ScopeInputs> {
        let mut inputs = ScopeInputs::default();
        for scope in Scope::ALL {
            inputs.set(scope, self.load(scope)?);
        }
        Ok(inputs)
    }
}

/// Settings stored as JSON files on disk
#[derive(Debug, Clone)]
pub struct SettingsFiles {
    user: Option<PathBuf>,
    project: PathBuf,
    local: PathBuf,
}

impl SettingsFiles {
    /// Standard locations for a working directory
    ///
    /// The user scope is absent when `$HOME` is not set.
    pub fn for_workdir(workdir: &Path) -> Self {
        let user = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(SETTINGS_DIR).join(SETTINGS_FILE));
        let project_dir = workdir.join(SETTINGS_DIR);
        Self {
            user,
            project: project_dir.join(SETTINGS_FILE),
            local: project_dir.join(LOCAL_SETTINGS_FILE),
        }
    }

    /// Explicit file locations
    pub fn with_paths(user: Option<PathBuf>, project: PathBuf, local: PathBuf) -> Self {
        Self {
            user,
            project,
            local,
        }
    }

    /// File backing a scope
    pub fn path(&self, scope: Scope) -> Option<&Path> {
        match scope {
            Scope::User => self.user.as_deref(),
            Scope::Project => Some(&self.project),
            Scope::Local => Some(&self.local),
        }
    }

    fn write_settings(path: &Path, settings: &ScopeSettings) -> GatekeeperResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a watcher never reads a half-written file
        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, settings)?;
            writeln!(writer)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl SettingsBackend for SettingsFiles {
    fn load(&self, scope: Scope) -> GatekeeperResult<Option<ScopeSettings>> {
        let Some(path) = self.path(scope) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(path)?;
        let settings =
            ScopeSettings::from_json(&text).map_err(|source| GatekeeperError::SettingsParse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(settings))
    }

    fn append_allow_rule(&self, scope: Scope, rule: &str) -> GatekeeperResult<()> {
        let path = self.path(scope).ok_or_else(|| {
            GatekeeperError::invalid_config(format!("no settings file for {} scope", scope))
        })?;

        let mut settings = self.load(scope)?.unwrap_or_default();
        if settings.push_allow_rule(rule) {
            Self::write_settings(path, &settings)?;
            tracing::info!(
                "[Settings] Added allow rule {} to {}",
                rule,
                path.display()
            );
        }
        Ok(())
    }
}

/// Settings held in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemorySettings {
    scopes: Mutex<HashMap<Scope, ScopeSettings>>,
}

impl MemorySettings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a scope's settings
    pub fn set(&self, scope: Scope, settings: ScopeSettings) {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope, settings);
    }

    /// Remove a scope's settings
    pub fn clear(&self, scope: Scope) {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope);
    }

    /// Current settings of a scope
    pub fn get(&self, scope: Scope) -> Option<ScopeSettings> {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .cloned()
    }
}

impl SettingsBackend for MemorySettings {
    fn load(&self, scope: Scope) -> GatekeeperResult<Option<ScopeSettings>> {
        Ok(self.get(scope))
    }

    fn append_allow_rule(&self, scope: Scope, rule: &str) -> GatekeeperResult<()> {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope)
            .or_default()
            .push_allow_rule(rule);
        Ok(())
    }
}
