pub mod config;
pub mod core;
pub mod permissions;

// Pre-tool-use hook overrides
pub mod hooks;

// Session-level front door combining hooks, rules and mode
pub mod gate;

// Optional components
pub mod cli;
pub mod logging;

pub use crate::core::{GatekeeperError, GatekeeperResult};
pub use gate::{Authorization, DecisionSource, Resolution, ToolGate, UserResponse};
