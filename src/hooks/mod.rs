//! Hooks Module
//!
//! Pre-tool-use hooks can override the rule-based decision for one call.
//!
//! # Overview
//!
//! Two kinds of hooks feed the same override:
//! - **External hooks**: a subprocess prints a JSON payload, parsed with
//!   [`parse_hook_output`]. Running the subprocess is the caller's job.
//! - **In-process hooks**: closures or [`Hook`] impls in a [`HookRegistry`],
//!   matched against the tool name by regex.
//!
//! A well-formed override replaces the rule-based decision. Several overrides
//! combine as Deny > Allow > Ask. A malformed payload is no override.
//!
//! # Example
//!
//! ```ignore
//! use shadow_gatekeeper::hooks::{parse_hook_output, PermissionDecision};
//!
//! let decision = parse_hook_output(r#"{"permissionDecision": "deny"}"#)?;
//! assert_eq!(decision.decision, PermissionDecision::Deny);
//! ```
//!
//! # Payload
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `permissionDecision` | `allow`, `deny` or `ask` (required) |
//! | `permissionDecisionReason` | Shown to the agent on deny, to the user on ask |
//! | `updatedInput` | Object replacing the tool input |

mod payload;
mod registry;
mod types;

pub use payload::{combine_outputs, parse_hook_output, HookParseError};
pub use registry::{ArcHook, Hook, HookMatcher, HookRegistry};
pub use types::{combine_results, HookContext, HookDecision, PermissionDecision};
