//! Authorization engine
//!
//! [`check_permission`] is the single decision function every tool call goes
//! through. It is pure: given one snapshot, one Safe Zone and an optional
//! temporary grant it always returns the same [`Decision`]. Evaluation order:
//!
//! 1. a matching deny rule denies
//! 2. tools outside the restricted set are allowed
//! 3. `BypassPermissions` allows
//! 4. `AcceptEdits` allows file mutations inside the Safe Zone
//! 5. a matching allow rule (persistent or temporary) allows
//! 6. otherwise the user is asked
//!
//! A file mutation that targets a path outside the Safe Zone skips 4 and 5.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::classifier::{expand_to_persistable_rule, should_hide_persistent_option};
use super::grants::{current_cycle_id, TemporaryGrant, TemporaryGrantStore};
use super::mode::PermissionMode;
use super::rule::{target_path, PermissionRule};
use super::safe_zone::SafeZone;
use crate::config::{RuleSnapshot, Scope, SnapshotStore};
use crate::core::GatekeeperResult;

/// Tools that need a decision; everything else is read-only
pub const RESTRICTED_TOOLS: [&str; 5] = ["Bash", "Write", "Edit", "MultiEdit", "Delete"];

/// Restricted tools that change files
pub const FILE_MUTATION_TOOLS: [&str; 4] = ["Write", "Edit", "MultiEdit", "Delete"];

const DENIED_BY_CONFIG: &str = "explicitly denied by configuration";
const NEEDS_CONFIRMATION: &str = "requires confirmation";

/// A proposed tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub tool_name: String,
    pub tool_input: Value,
    pub mode: PermissionMode,
    /// Snapshot the request was prepared against
    pub snapshot_version: u64,
    /// Turn the invocation belongs to, for temporary grants
    pub cycle_id: Option<String>,
}

impl DecisionRequest {
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            mode: PermissionMode::Default,
            snapshot_version: 0,
            cycle_id: None,
        }
    }

    pub fn with_mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cycle(mut self, cycle_id: impl Into<String>) -> Self {
        self.cycle_id = Some(cycle_id.into());
        self
    }

    pub fn with_snapshot_version(mut self, version: u64) -> Self {
        self.snapshot_version = version;
        self
    }
}

/// Who a refusal or question is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Reported back to the model as the tool result
    Agent,
    /// Shown to the human in a confirmation prompt
    User,
}

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        reason: String,
        audience: Audience,
    },
    Ask {
        reason: String,
        audience: Audience,
        /// Withhold the "don't ask again" choice
        hide_persistent_option: bool,
    },
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny {
            reason: reason.into(),
            audience: Audience::Agent,
        }
    }

    pub fn ask(reason: impl Into<String>, hide_persistent_option: bool) -> Self {
        Decision::Ask {
            reason: reason.into(),
            audience: Audience::User,
            hide_persistent_option,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Decision::Deny { .. })
    }

    pub fn is_ask(&self) -> bool {
        matches!(self, Decision::Ask { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allow => None,
            Decision::Deny { reason, .. } | Decision::Ask { reason, .. } => Some(reason),
        }
    }

    pub fn hide_persistent_option(&self) -> bool {
        matches!(
            self,
            Decision::Ask {
                hide_persistent_option: true,
                ..
            }
        )
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny { reason, .. } => write!(f, "deny ({})", reason),
            Decision::Ask { reason, .. } => write!(f, "ask ({})", reason),
        }
    }
}

/// Decide one tool invocation
pub fn check_permission(
    request: &DecisionRequest,
    snapshot: &RuleSnapshot,
    zone: &SafeZone,
    grant: Option<&TemporaryGrant>,
) -> Decision {
    let tool = request.tool_name.as_str();
    let input = &request.tool_input;

    // 1. Deny rules win over everything
    if let Some(rule) = matching_deny_rule(snapshot, zone, tool, input) {
        tracing::debug!("[Engine] {} denied by {}", tool, rule);
        return Decision::deny(DENIED_BY_CONFIG);
    }

    // 2. Read-only tools
    if !RESTRICTED_TOOLS.contains(&tool) {
        return Decision::Allow;
    }

    // 3. Bypass
    if request.mode == PermissionMode::BypassPermissions {
        tracing::debug!("[Engine] {} allowed by bypass mode", tool);
        return Decision::Allow;
    }

    let mutation_target = FILE_MUTATION_TOOLS
        .contains(&tool)
        .then(|| target_path(tool, input))
        .flatten();
    let escapes_zone = mutation_target.is_some_and(|path| !zone.contains(path));

    if !escapes_zone {
        // 4. Auto-accepted edits
        if request.mode == PermissionMode::AcceptEdits && mutation_target.is_some() {
            tracing::debug!("[Engine] {} allowed by acceptEdits mode", tool);
            return Decision::Allow;
        }

        // 5. Allow rules
        if let Some(rule) = snapshot.allow.iter().find(|r| r.matches(tool, input)) {
            tracing::debug!("[Engine] {} allowed by {}", tool, rule);
            return Decision::Allow;
        }
        if grant.is_some_and(|g| g.matches(tool, input)) {
            tracing::debug!("[Engine] {} allowed by temporary grant", tool);
            return Decision::Allow;
        }
    } else {
        tracing::debug!("[Engine] {} targets a path outside the Safe Zone", tool);
    }

    // 6. Ask
    Decision::ask(
        NEEDS_CONFIRMATION,
        escapes_zone || should_hide_persistent_option(tool, input, zone),
    )
}

/// First deny rule matching the invocation under any spelling of its target path
fn matching_deny_rule<'a>(
    snapshot: &'a RuleSnapshot,
    zone: &SafeZone,
    tool: &str,
    input: &Value,
) -> Option<&'a PermissionRule> {
    if let Some(rule) = snapshot.deny.iter().find(|r| r.matches(tool, input)) {
        return Some(rule);
    }
    let aliases = zone.aliases(target_path(tool, input)?);
    snapshot
        .deny
        .iter()
        .find(|rule| aliases.iter().any(|alias| rule.matches_path(tool, alias)))
}

/// Result of a "don't ask again" request
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// The rule was written and is live in snapshot `version`
    Persisted { rule: PermissionRule, version: u64 },
    /// The invocation may not be persisted
    Refused,
}

/// Decision function bound to the live snapshot and the active grants
#[derive(Debug, Clone)]
pub struct AuthorizationEngine {
    store: Arc<SnapshotStore>,
    grants: Arc<TemporaryGrantStore>,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<SnapshotStore>, grants: Arc<TemporaryGrantStore>) -> Self {
        Self { store, grants }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn grants(&self) -> &Arc<TemporaryGrantStore> {
        &self.grants
    }

    /// Build a request stamped with the current snapshot version and the
    /// cycle of the running task
    pub fn request(
        &self,
        tool_name: impl Into<String>,
        tool_input: Value,
        mode: PermissionMode,
    ) -> DecisionRequest {
        DecisionRequest {
            tool_name: tool_name.into(),
            tool_input,
            mode,
            snapshot_version: self.store.version(),
            cycle_id: current_cycle_id(),
        }
    }

    /// Decide a request against exactly one snapshot
    pub fn decide(&self, request: &DecisionRequest) -> Decision {
        let snapshot = self.store.load();
        if request.snapshot_version != 0 && request.snapshot_version != snapshot.version {
            tracing::debug!(
                "[Engine] Request prepared against v{}, deciding against v{}",
                request.snapshot_version,
                snapshot.version
            );
        }

        let grant = request
            .cycle_id
            .as_deref()
            .and_then(|id| self.grants.grant(id));

        let decision = check_permission(request, &snapshot, &snapshot.safe_zone, grant.as_deref());
        tracing::debug!(
            "[Engine] {} -> {} (snapshot v{})",
            request.tool_name,
            decision,
            snapshot.version
        );
        decision
    }

    /// Persist a "don't ask again" answer for this invocation
    pub fn persist_grant(
        &self,
        request: &DecisionRequest,
        scope: Scope,
    ) -> GatekeeperResult<PersistOutcome> {
        let snapshot = self.store.load();
        let Some(rule) =
            expand_to_persistable_rule(&request.tool_name, &request.tool_input, &snapshot.safe_zone)
        else {
            tracing::warn!(
                "[Engine] Refused to persist a rule for {}",
                request.tool_name
            );
            return Ok(PersistOutcome::Refused);
        };

        let snapshot = self.store.persist_allow_rule(scope, &rule)?;
        Ok(PersistOutcome::Persisted {
            rule,
            version: snapshot.version,
        })
    }
}
