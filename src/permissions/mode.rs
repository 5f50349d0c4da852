//! Permission modes

use std::fmt;

use serde::{Deserialize, Serialize};

/// How much the agent may do without asking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask for every restricted tool call not covered by a rule
    #[default]
    Default,
    /// Auto-accept file edits inside the Safe Zone
    AcceptEdits,
    /// Allow everything that is not explicitly denied
    ///
    /// Only reachable through configuration, never through cycling.
    BypassPermissions,
}

impl PermissionMode {
    /// Next mode for the UI's mode-cycling shortcut
    ///
    /// `Default -> AcceptEdits -> Default`; leaving `BypassPermissions` goes to
    /// `Default` and there is no way back by cycling.
    pub fn cycle(self) -> Self {
        match self {
            PermissionMode::Default => PermissionMode::AcceptEdits,
            PermissionMode::AcceptEdits | PermissionMode::BypassPermissions => {
                PermissionMode::Default
            }
        }
    }

    /// Settings-file spelling of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_never_enters_bypass() {
        let mut mode = PermissionMode::Default;
        for _ in 0..10 {
            mode = mode.cycle();
            assert_ne!(mode, PermissionMode::BypassPermissions);
        }
        assert_eq!(PermissionMode::Default.cycle(), PermissionMode::AcceptEdits);
        assert_eq!(PermissionMode::AcceptEdits.cycle(), PermissionMode::Default);
        assert_eq!(PermissionMode::BypassPermissions.cycle(), PermissionMode::Default);
    }

    #[test]
    fn test_serde_spelling() {
        assert_eq!(
            serde_json::to_string(&PermissionMode::AcceptEdits).unwrap(),
            "\"acceptEdits\""
        );
        let mode: PermissionMode = serde_json::from_str("\"bypassPermissions\"").unwrap();
        assert_eq!(mode, PermissionMode::BypassPermissions);
        assert!(serde_json::from_str::<PermissionMode>("\"yolo\"").is_err());
        assert_eq!(PermissionMode::Default.to_string(), "default");
    }
}
