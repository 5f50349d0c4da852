use colored::*;
use std::io::{self, BufRead, Write};

use crate::config::Scope;
use crate::gate::{Authorization, DecisionSource, Resolution, UserResponse};
use crate::permissions::Decision;

/// Console handles terminal output and confirmation prompts with colored formatting
pub struct Console {
    tool_color: Color,
    /// Scope "always allow" saves to
    remember_scope: Scope,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            tool_color: Color::Magenta,
            remember_scope: Scope::Local,
        }
    }

    /// Save "always allow" answers to another scope
    pub fn with_remember_scope(mut self, scope: Scope) -> Self {
        self.remember_scope = scope;
        self
    }

    pub fn remember_scope(&self) -> Scope {
        self.remember_scope
    }

    /// Print the decision for a tool call
    pub fn print_decision(&self, authorization: &Authorization) {
        let tool = authorization.tool_name().color(self.tool_color).bold();
        let source = match authorization.source {
            DecisionSource::Rules => "rules",
            DecisionSource::Hook => "hook",
        };

        match &authorization.decision {
            Decision::Allow => {
                println!(
                    "{} {} {}",
                    "✓ allow".green().bold(),
                    tool,
                    format!("({})", source).bright_black()
                );
            }
            Decision::Deny { reason, .. } => {
                println!(
                    "{} {} {}",
                    "✗ deny".red().bold(),
                    tool,
                    format!("({})", source).bright_black()
                );
                println!("  {}", reason);
            }
            Decision::Ask {
                reason,
                hide_persistent_option,
                ..
            } => {
                println!(
                    "{} {} {}",
                    "? ask".yellow().bold(),
                    tool,
                    format!("({})", source).bright_black()
                );
                println!("  {}", reason);
                if *hide_persistent_option {
                    let note = "\"Always allow\" is not available for this call";
                    println!("  {}", note.bright_black());
                }
            }
        }
    }

    /// Ask the user to confirm a tool call
    pub fn ask_permission(&self, authorization: &Authorization) -> io::Result<UserResponse> {
        let allow_always = !authorization.decision.hide_persistent_option();

        println!();
        println!("{}", "─".repeat(60).yellow());
        println!(
            "{} The agent wants to use tool: {}",
            "⚠️ Permission Required".yellow().bold(),
            authorization.tool_name().color(self.tool_color).bold()
        );
        println!();
        println!("  {}", authorization.input.to_string().bright_black());
        println!();
        println!("{}", "Options:".yellow());
        println!("  [y] Allow this action");
        println!("  [n] Deny this action");
        if allow_always {
            println!("  [a] Always allow (saved to {} settings)", self.remember_scope);
        }
        println!("{}", "─".repeat(60).yellow());
        let prompt = if allow_always { "Your choice (y/n/a):" } else { "Your choice (y/n):" };
        print!("{} ", prompt.yellow().bold());
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;

        let response = parse_choice(&input, allow_always, self.remember_scope).unwrap_or_else(|| {
            println!("{}", "Invalid choice. Defaulting to Deny.".red());
            UserResponse::Deny
        });
        Ok(response)
    }

    /// Print the outcome after the user answered
    pub fn print_resolution(&self, authorization: &Authorization, resolution: &Resolution) {
        match (&resolution.persisted, resolution.allowed) {
            (Some(rule), _) => {
                println!("{}", format!("✓ Always allowing: {}", rule).green());
            }
            (None, true) => println!("{}", "✓ Allowed".green()),
            (None, false) => println!(
                "{}",
                format!("✗ Denied: {}", authorization.tool_name()).red()
            ),
        }
    }

    /// Print an error message
    pub fn print_error(&self, error: &str) {
        eprintln!("{} {}", "Error:".red().bold(), error);
    }
}

/// Map a prompt answer to a response; `None` for anything unrecognized
fn parse_choice(input: &str, allow_always: bool, scope: Scope) -> Option<UserResponse> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(UserResponse::AllowOnce),
        "n" | "no" => Some(UserResponse::Deny),
        "a" | "always" if allow_always => Some(UserResponse::AllowAlways(scope)),
        _ => None,
    }
}
