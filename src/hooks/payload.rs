//! Hook output payloads
//!
//! External pre-tool-use hooks print a JSON object on stdout:
//!
//! ```json
//! { "permissionDecision": "deny", "permissionDecisionReason": "no prod access" }
//! ```
//!
//! The same fields may also be nested under `hookSpecificOutput`. Anything
//! that does not parse is a [`HookParseError`] and means "no override".

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::types::{HookDecision, PermissionDecision};

/// Why a hook payload was not accepted
#[derive(Error, Debug)]
pub enum HookParseError {
    #[error("hook produced no output")]
    Empty,

    #[error("hook output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("hook output is not a JSON object")]
    NotAnObject,

    #[error("hook output has no permissionDecision")]
    MissingDecision,

    #[error("unknown permissionDecision {0:?}")]
    UnknownDecision(String),

    #[error("updatedInput must be a JSON object")]
    InvalidUpdatedInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    permission_decision: Option<Value>,
    permission_decision_reason: Option<String>,
    updated_input: Option<Value>,
}

/// Parse the stdout of a pre-tool-use hook
pub fn parse_hook_output(raw: &str) -> Result<HookDecision, HookParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HookParseError::Empty);
    }

    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(HookParseError::NotAnObject);
    }

    let body = match value.get("hookSpecificOutput") {
        Some(nested) if nested.get("permissionDecision").is_some() => nested.clone(),
        _ => value,
    };
    if !body.is_object() {
        return Err(HookParseError::NotAnObject);
    }
    let payload: Payload = serde_json::from_value(body)?;

    let decision = match payload.permission_decision {
        None | Some(Value::Null) => return Err(HookParseError::MissingDecision),
        Some(Value::String(s)) => {
            PermissionDecision::parse(&s).ok_or(HookParseError::UnknownDecision(s))?
        }
        Some(other) => return Err(HookParseError::UnknownDecision(other.to_string())),
    };

    let updated_input = match payload.updated_input {
        None | Some(Value::Null) => None,
        Some(input @ Value::Object(_)) => Some(input),
        Some(_) => return Err(HookParseError::InvalidUpdatedInput),
    };

    Ok(HookDecision {
        decision,
        reason: payload.permission_decision_reason,
        updated_input,
    })
}

/// Parse several hook outputs and combine the well-formed ones
///
/// Malformed payloads are logged and skipped.
pub fn combine_outputs<S: AsRef<str>>(outputs: &[S]) -> Option<HookDecision> {
    outputs
        .iter()
        .filter_map(|raw| match parse_hook_output(raw.as_ref()) {
            Ok(decision) => Some(decision),
            Err(HookParseError::Empty) => None,
            Err(e) => {
                tracing::warn!("[Hooks] Ignoring hook output: {}", e);
                None
            }
        })
        .fold(None, |acc, next| super::types::combine_results(acc, Some(next)))
}
