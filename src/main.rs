use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::Value;

use shadow_gatekeeper::cli::Console;
use shadow_gatekeeper::config::Scope;
use shadow_gatekeeper::logging;
use shadow_gatekeeper::permissions::{new_cycle_id, Decision, PermissionMode};
use shadow_gatekeeper::ToolGate;

/// Decide one tool call against the settings of WORKDIR
#[derive(Parser, Debug)]
#[command(version, about, after_help = "Exit status: 0 allow, 1 ask, 2 deny.")]
struct Args {
    /// Working directory whose settings apply
    workdir: PathBuf,

    /// Tool name, e.g. Bash or Write
    tool: String,

    /// Tool input as a JSON object
    #[arg(value_parser = parse_json)]
    input: Value,

    /// Session mode (bypassPermissions can only come from settings)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// JSON output of a pre-tool-use hook (repeatable)
    #[arg(long = "hook", value_name = "FILE")]
    hooks: Vec<PathBuf>,

    /// Rule granted for this call only (repeatable)
    #[arg(long = "allowed-tool", value_name = "RULE")]
    allowed_tools: Vec<String>,

    /// Prompt when the decision is "ask"
    #[arg(long)]
    interactive: bool,

    /// Settings scope "always allow" saves to
    #[arg(long, value_enum, default_value_t = ScopeArg::Local)]
    remember: ScopeArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Default,
    #[value(name = "acceptEdits")]
    AcceptEdits,
}

impl From<ModeArg> for PermissionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Default => PermissionMode::Default,
            ModeArg::AcceptEdits => PermissionMode::AcceptEdits,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScopeArg {
    User,
    Project,
    Local,
}

impl From<ScopeArg> for Scope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::User => Scope::User,
            ScopeArg::Project => Scope::Project,
            ScopeArg::Local => Scope::Local,
        }
    }
}

fn parse_json(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Keep the guard alive so file logs are flushed on exit
    let _log_guard = logging::init_logging()?;

    let args = Args::parse();
    tracing::debug!("Arguments: {:?}", args);

    let mut hook_outputs = Vec::with_capacity(args.hooks.len());
    for path in &args.hooks {
        let output = std::fs::read_to_string(path)
            .with_context(|| format!("reading hook output {}", path.display()))?;
        hook_outputs.push(output);
    }

    let gate = ToolGate::open(&args.workdir)?;
    if let Some(mode) = args.mode.map(PermissionMode::from) {
        while gate.mode() != mode {
            gate.cycle_mode();
        }
    }

    let console = Console::new().with_remember_scope(args.remember.into());
    let status = gate
        .engine()
        .grants()
        .run_cycle(new_cycle_id(), &args.allowed_tools, async {
            let authorization = gate.authorize(&args.tool, args.input.clone(), &hook_outputs);
            console.print_decision(&authorization);

            match &authorization.decision {
                Decision::Allow => Ok::<u8, std::io::Error>(0),
                Decision::Deny { .. } => Ok(2),
                Decision::Ask { .. } if args.interactive => {
                    let response = console.ask_permission(&authorization)?;
                    let resolution = gate.resolve(&authorization, response);
                    console.print_resolution(&authorization, &resolution);
                    Ok(if resolution.allowed { 0 } else { 2 })
                }
                Decision::Ask { .. } => Ok(1),
            }
        })
        .await?;

    let status = status.map_err(|e| {
        console.print_error(&e.to_string());
        e
    })?;
    Ok(ExitCode::from(status))
}
