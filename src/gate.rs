//! Tool Gate
//!
//! Permission-aware front door for tool execution. For each proposed call:
//! 1. Run pre-tool-use hooks (in-process and external payloads)
//! 2. If a hook decided, use its decision (and its replacement input)
//! 3. Otherwise ask the authorization engine
//! 4. For `Ask`, the caller prompts the user and reports back through [`ToolGate::resolve`]
//!
//! The gate also owns the session's permission mode.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::config::{Scope, SettingsFiles, SnapshotStore};
use crate::core::GatekeeperResult;
use crate::hooks::{
    combine_outputs, combine_results, HookContext, HookDecision, HookRegistry, PermissionDecision,
};
use crate::permissions::{
    should_hide_persistent_option, AuthorizationEngine, Decision, DecisionRequest, PermissionMode,
    PermissionRule, PersistOutcome, TemporaryGrantStore,
};

/// Where a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Rules,
    Hook,
}

/// Result of authorizing one tool call
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub decision: Decision,
    /// Input the tool should run with (a hook may have replaced it)
    pub input: Value,
    pub source: DecisionSource,
    /// The request as decided, used when the user answers
    pub request: DecisionRequest,
}

impl Authorization {
    pub fn tool_name(&self) -> &str {
        &self.request.tool_name
    }
}

/// The user's answer to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserResponse {
    AllowOnce,
    /// Allow and don't ask again, saving a rule to the given scope
    AllowAlways(Scope),
    Deny,
}

/// Final outcome of a tool call's authorization
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub allowed: bool,
    /// Rule saved by "don't ask again"
    pub persisted: Option<PermissionRule>,
}

/// Permission gate for one session
pub struct ToolGate {
    engine: AuthorizationEngine,
    mode: Mutex<PermissionMode>,
    hooks: Option<HookRegistry>,
}

impl ToolGate {
    /// Create a gate; the mode starts at the configured `defaultMode`
    pub fn new(engine: AuthorizationEngine) -> Self {
        let mode = engine.store().load().default_mode;
        tracing::info!("[Gate] Session starts in {} mode", mode);
        Self {
            engine,
            mode: Mutex::new(mode),
            hooks: None,
        }
    }

    /// Gate over the on-disk settings of a working directory
    pub fn open(workdir: &Path) -> GatekeeperResult<Self> {
        let backend = Arc::new(SettingsFiles::for_workdir(workdir));
        let store = Arc::new(SnapshotStore::open(workdir, backend)?);
        let engine = AuthorizationEngine::new(store, Arc::new(TemporaryGrantStore::new()));
        Ok(Self::new(engine))
    }

    /// Attach in-process hooks
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    /// Current permission mode
    pub fn mode(&self) -> PermissionMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance to the next mode (the UI shortcut); never enters bypass
    pub fn cycle_mode(&self) -> PermissionMode {
        let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        *mode = mode.cycle();
        tracing::info!("[Gate] Permission mode is now {}", *mode);
        *mode
    }

    /// Decide a proposed tool call
    ///
    /// `hook_outputs` are the raw stdout payloads of external hooks; empty or
    /// malformed ones are ignored.
    pub fn authorize<S: AsRef<str>>(
        &self,
        tool_name: &str,
        input: Value,
        hook_outputs: &[S],
    ) -> Authorization {
        let mut request = self.engine.request(tool_name, input, self.mode());

        let in_process = self.hooks.as_ref().and_then(|hooks| {
            let ctx = HookContext::pre_tool_use(tool_name, &request.tool_input, request.mode)
                .with_cycle(request.cycle_id.as_deref());
            hooks.run(&ctx)
        });
        let hook = combine_results(in_process, combine_outputs(hook_outputs));

        let Some(hook) = hook else {
            let decision = self.engine.decide(&request);
            log_decision(tool_name, &decision, DecisionSource::Rules);
            return Authorization {
                decision,
                input: request.tool_input.clone(),
                source: DecisionSource::Rules,
                request,
            };
        };

        let HookDecision {
            decision,
            reason,
            updated_input,
        } = hook;
        if let Some(updated) = updated_input {
            tracing::info!("[Gate] Hook replaced the input of {}", tool_name);
            request.tool_input = updated;
        }

        let decision = match decision {
            PermissionDecision::Allow => Decision::Allow,
            PermissionDecision::Deny => {
                Decision::deny(reason.unwrap_or_else(|| "blocked by hook".to_string()))
            }
            PermissionDecision::Ask => {
                let snapshot = self.engine.store().load();
                Decision::ask(
                    reason.unwrap_or_else(|| "hook requested confirmation".to_string()),
                    should_hide_persistent_option(
                        tool_name,
                        &request.tool_input,
                        &snapshot.safe_zone,
                    ),
                )
            }
        };
        log_decision(tool_name, &decision, DecisionSource::Hook);

        Authorization {
            decision,
            input: request.tool_input.clone(),
            source: DecisionSource::Hook,
            request,
        }
    }

    /// Apply the user's answer to an `Ask`
    ///
    /// `Allow` and `Deny` decisions are final and ignore the answer. "Don't ask
    /// again" is downgraded to a one-time allow when the invocation may not be
    /// persisted or the rule cannot be saved.
    pub fn resolve(&self, authorization: &Authorization, response: UserResponse) -> Resolution {
        let tool_name = authorization.tool_name();
        let hide_persistent_option = match &authorization.decision {
            Decision::Allow => return Resolution::allowed(None),
            Decision::Deny { .. } => return Resolution::denied(),
            Decision::Ask {
                hide_persistent_option,
                ..
            } => *hide_persistent_option,
        };

        let scope = match response {
            UserResponse::Deny => {
                tracing::info!("[Gate] User denied {}", tool_name);
                return Resolution::denied();
            }
            UserResponse::AllowOnce => {
                tracing::info!("[Gate] User allowed {} once", tool_name);
                return Resolution::allowed(None);
            }
            UserResponse::AllowAlways(scope) => scope,
        };

        if hide_persistent_option {
            tracing::warn!(
                "[Gate] 'Always allow' was not offered for {}, allowing once",
                tool_name
            );
            return Resolution::allowed(None);
        }

        match self.engine.persist_grant(&authorization.request, scope) {
            Ok(PersistOutcome::Persisted { rule, version }) => {
                tracing::info!(
                    "[Gate] User always allowed {} ({} saved, v{})",
                    tool_name,
                    rule,
                    version
                );
                Resolution::allowed(Some(rule))
            }
            Ok(PersistOutcome::Refused) => Resolution::allowed(None),
            Err(e) => {
                tracing::error!("[Gate] Failed to save rule for {}: {}", tool_name, e);
                Resolution::allowed(None)
            }
        }
    }
}

impl Resolution {
    fn allowed(persisted: Option<PermissionRule>) -> Self {
        Self {
            allowed: true,
            persisted,
        }
    }

    fn denied() -> Self {
        Self {
            allowed: false,
            persisted: None,
        }
    }
}

impl std::fmt::Debug for ToolGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGate")
            .field("mode", &self.mode())
            .field("engine", &self.engine)
            .field("hooks", &self.hooks)
            .finish()
    }
}

fn log_decision(tool_name: &str, decision: &Decision, source: DecisionSource) {
    match decision {
        Decision::Allow => tracing::debug!("[Gate] {} allowed ({:?})", tool_name, source),
        Decision::Deny { reason, .. } => {
            tracing::info!("[Gate] {} denied ({:?}): {}", tool_name, source, reason)
        }
        Decision::Ask { .. } => {
            tracing::debug!("[Gate] Asking user for {} ({:?})", tool_name, source)
        }
    }
}
