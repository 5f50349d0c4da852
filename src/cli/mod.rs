//! Terminal front end for the `shadow-gatekeeper` binary

mod console;

pub use console::Console;
