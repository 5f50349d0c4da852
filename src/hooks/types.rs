//! Hook Types
//!
//! - `PermissionDecision` - what a pre-tool-use hook decided
//! - `HookDecision` - a decision plus optional reason and replacement input
//! - `HookContext` - the invocation a hook is asked about

use serde_json::Value;

use crate::permissions::PermissionMode;

/// Permission decision from a pre-tool-use hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Run the tool without asking
    Allow,
    /// Refuse the tool call, report the reason to the agent
    Deny,
    /// Ask the user, whatever the rules say
    Ask,
}

impl PermissionDecision {
    /// Parse the payload spelling (`allow`, `deny`, `ask`)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(PermissionDecision::Allow),
            "deny" => Some(PermissionDecision::Deny),
            "ask" => Some(PermissionDecision::Ask),
            _ => None,
        }
    }

    /// Combine priority: Deny > Allow > Ask
    fn rank(self) -> u8 {
        match self {
            PermissionDecision::Deny => 2,
            PermissionDecision::Allow => 1,
            PermissionDecision::Ask => 0,
        }
    }
}

impl std::fmt::Display for PermissionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionDecision::Allow => write!(f, "allow"),
            PermissionDecision::Deny => write!(f, "deny"),
            PermissionDecision::Ask => write!(f, "ask"),
        }
    }
}

/// A well-formed hook override
///
/// Replaces the rule-based decision entirely. `updated_input`, when present,
/// replaces the tool input before the tool runs.
#[derive(Debug, Clone, PartialEq)]
pub struct HookDecision {
    pub decision: PermissionDecision,
    pub reason: Option<String>,
    pub updated_input: Option<Value>,
}

impl HookDecision {
    /// Allow the operation (skip the rules)
    pub fn allow() -> Self {
        Self::new(PermissionDecision::Allow)
    }

    /// Deny the operation with a reason
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::new(PermissionDecision::Deny).with_reason(reason)
    }

    /// Force a confirmation prompt
    pub fn ask() -> Self {
        Self::new(PermissionDecision::Ask)
    }

    fn new(decision: PermissionDecision) -> Self {
        Self {
            decision,
            reason: None,
            updated_input: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Replace the tool input
    pub fn with_updated_input(mut self, input: Value) -> Self {
        self.updated_input = Some(input);
        self
    }
}

/// Combine two hook overrides
///
/// Priority: Deny > Allow > Ask > no override. On a tie the first one wins.
pub fn combine_results(a: Option<HookDecision>, b: Option<HookDecision>) -> Option<HookDecision> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if b.decision.rank() > a.decision.rank() {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, None) => a,
        (None, b) => b,
    }
}

/// The invocation a hook is asked about
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub tool_name: &'a str,
    pub tool_input: &'a Value,
    pub mode: PermissionMode,
    pub cycle_id: Option<&'a str>,
}

impl<'a> HookContext<'a> {
    pub fn pre_tool_use(tool_name: &'a str, tool_input: &'a Value, mode: PermissionMode) -> Self {
        Self {
            tool_name,
            tool_input,
            mode,
            cycle_id: None,
        }
    }

    pub fn with_cycle(mut self, cycle_id: Option<&'a str>) -> Self {
        self.cycle_id = cycle_id;
        self
    }

    /// Bash command of the invocation, if any
    pub fn command(&self) -> Option<&'a str> {
        self.tool_input.get("command").and_then(|v| v.as_str())
    }
}
