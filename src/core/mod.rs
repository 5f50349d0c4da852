//! Core types shared across the gatekeeper
//!
//! - `GatekeeperError` / `GatekeeperResult` - Error types

pub mod error;

pub use error::{GatekeeperError, GatekeeperResult};
