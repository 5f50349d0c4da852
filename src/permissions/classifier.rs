//! Dangerous command classifier
//!
//! Decides which invocations may never be granted a persistent
//! "don't ask again" rule: destructive or privileged shell commands, and
//! anything that reaches outside the Safe Zone. The persistence gate lives
//! here rather than in the UI so that no caller can get around it.

use glob::Pattern;
use serde_json::Value;

use super::rule::{bash_command, path_field, target_path, PermissionRule, BASH_TOOL};
use super::safe_zone::SafeZone;

/// Verbs that are dangerous regardless of their arguments
const DANGEROUS_VERBS: &[&str] = &[
    "sudo", "su", "doas", "pkexec", "chown", "chmod", "chgrp", "mkfs", "dd", "fdisk", "parted",
    "wipefs", "shred", "shutdown", "reboot", "halt", "poweroff",
];

/// Directory navigation and listing verbs whose targets are checked against the zone
const NAVIGATION_VERBS: &[&str] = &["cd", "pushd", "ls", "tree", "find"];

/// Prefixes that run the following word as the real command
const COMMAND_WRAPPERS: &[&str] = &[
    "env", "nohup", "time", "nice", "command", "exec", "builtin", "xargs",
];

/// Shells whose `-c` argument is itself a command line
const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

/// Deepest `sh -c` nesting inspected; anything deeper counts as dangerous
const MAX_NESTING: usize = 4;

/// Risk assessment of one tool invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    /// The command's verb is on the blacklist
    pub dangerous: bool,
    /// The invocation targets a path outside the Safe Zone
    pub out_of_bounds: bool,
}

impl Classification {
    /// Whether the "don't ask again" option must be withheld
    pub fn should_hide_persistent_option(&self) -> bool {
        self.dangerous || self.out_of_bounds
    }
}

/// Classify a tool invocation
pub fn classify(tool_name: &str, input: &Value, zone: &SafeZone) -> Classification {
    if tool_name == BASH_TOOL {
        let Some(command) = bash_command(input) else {
            return Classification::default();
        };
        return classify_command(command, zone);
    }

    if path_field(tool_name).is_some() {
        let out_of_bounds = target_path(tool_name, input).is_some_and(|p| !zone.contains(p));
        return Classification {
            dangerous: false,
            out_of_bounds,
        };
    }

    Classification::default()
}

/// Whether the "don't ask again" option must be withheld for this invocation
pub fn should_hide_persistent_option(tool_name: &str, input: &Value, zone: &SafeZone) -> bool {
    classify(tool_name, input, zone).should_hide_persistent_option()
}

/// Turn an invocation into the rule that "don't ask again" would persist
///
/// Returns `None` for dangerous or out-of-bounds invocations, whoever asks.
pub fn expand_to_persistable_rule(
    tool_name: &str,
    input: &Value,
    zone: &SafeZone,
) -> Option<PermissionRule> {
    let classification = classify(tool_name, input, zone);
    if classification.should_hide_persistent_option() {
        tracing::warn!(
            "[Classifier] Blocked persistence attempt for {} (dangerous={}, out_of_bounds={})",
            tool_name,
            classification.dangerous,
            classification.out_of_bounds
        );
        return None;
    }

    if tool_name == BASH_TOOL {
        let command = bash_command(input).filter(|c| !c.is_empty())?;
        // A literal `*` would be read back as a wildcard
        if command.contains('*') {
            tracing::info!(
                "[Classifier] Not persisting command with '*', it cannot be stored exactly: {}",
                command
            );
            return None;
        }
        return Some(PermissionRule::bash_exact(command));
    }

    if path_field(tool_name).is_some() {
        let path = target_path(tool_name, input).filter(|p| !p.is_empty())?;
        let pattern = Pattern::new(&Pattern::escape(path)).ok()?;
        return Some(PermissionRule::PathGlob {
            tool: tool_name.to_string(),
            pattern,
        });
    }

    Some(PermissionRule::tool_only(tool_name))
}

fn classify_command(command: &str, zone: &SafeZone) -> Classification {
    classify_nested(command, zone, 0)
}

fn classify_nested(command: &str, zone: &SafeZone, depth: usize) -> Classification {
    let mut result = Classification::default();

    for segment in split_segments(command) {
        let words = shell_words(&segment);
        let Some((verb, args)) = leading_verb(&words) else {
            continue;
        };

        if is_dangerous(verb, args) {
            result.dangerous = true;
        }
        if NAVIGATION_VERBS.contains(&verb) && navigates_outside(verb, args, zone) {
            result.out_of_bounds = true;
        }

        if let Some(script) = inline_script(verb, args) {
            if depth >= MAX_NESTING {
                result.dangerous = true;
                continue;
            }
            let inner = classify_nested(script, zone, depth + 1);
            result.dangerous |= inner.dangerous;
            result.out_of_bounds |= inner.out_of_bounds;
        }
    }

    result
}

/// Command line handed to a shell through `-c` (or a flag cluster like `-lc`)
fn inline_script<'a>(verb: &str, args: &'a [String]) -> Option<&'a str> {
    if !SHELLS.contains(&verb) {
        return None;
    }
    let flag = args.iter().position(|a| short_flag(a, &['c']))?;
    args.get(flag + 1).map(String::as_str)
}

/// Split a command line on `;`, `&`, `|` and newlines outside quotes
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut single = false;
    let mut double = false;
    let mut escaped = false;

    for c in command.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if !single => {
                current.push(c);
                escaped = true;
            }
            '\'' if !double => {
                single = !single;
                current.push(c);
            }
            '"' if !single => {
                double = !double;
                current.push(c);
            }
            ';' | '&' | '|' | '\n' if !single && !double => {
                if !current.trim().is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }
    segments
}

/// Split one segment into words, removing quotes
fn shell_words(segment: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut single = false;
    let mut double = false;
    let mut escaped = false;

    for c in segment.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if !single => {
                escaped = true;
                in_word = true;
            }
            '\'' if !double => {
                single = !single;
                in_word = true;
            }
            '"' if !single => {
                double = !double;
                in_word = true;
            }
            c if c.is_whitespace() && !single && !double => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Find the real command verb, skipping env assignments, subshell openers and wrappers
fn leading_verb(words: &[String]) -> Option<(&str, &[String])> {
    let mut i = 0;
    while i < words.len() {
        let word = words[i].trim_start_matches(&['(', '{'][..]);
        if word.is_empty() || is_env_assignment(word) {
            i += 1;
            continue;
        }

        let verb = word.rsplit('/').next().unwrap_or(word);
        if COMMAND_WRAPPERS.contains(&verb) {
            let valued = wrapper_value_flags(verb);
            i += 1;
            while i < words.len() && words[i].starts_with('-') {
                if valued.contains(&words[i].as_str()) {
                    i += 1;
                }
                i += 1;
            }
            continue;
        }
        return Some((verb, &words[i + 1..]));
    }
    None
}

/// Wrapper options that take the next word as their value
fn wrapper_value_flags(wrapper: &str) -> &'static [&'static str] {
    match wrapper {
        "xargs" => &["-I", "-n", "-P", "-L", "-s", "-d", "-E", "-a"],
        "env" => &["-u", "-C"],
        "nice" => &["-n"],
        _ => &[],
    }
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn is_dangerous(verb: &str, args: &[String]) -> bool {
    if DANGEROUS_VERBS.contains(&verb) || verb.starts_with("mkfs.") {
        return true;
    }
    match verb {
        "rm" => args.iter().any(|a| a == "--recursive" || short_flag(a, &['r', 'R'])),
        "git" => dangerous_git(args),
        _ => false,
    }
}

fn dangerous_git(args: &[String]) -> bool {
    let mut i = 0;
    while i < args.len() && args[i].starts_with('-') {
        // -C <path> and -c <key=value> take a separate value
        if args[i] == "-C" || args[i] == "-c" {
            i += 1;
        }
        i += 1;
    }
    let Some(subcommand) = args.get(i) else {
        return false;
    };
    let rest = &args[i + 1..];

    match subcommand.as_str() {
        "push" => rest.iter().any(|a| {
            a == "--force"
                || a.starts_with("--force-with-lease")
                || a == "--mirror"
                || a == "--delete"
                || short_flag(a, &['f', 'd'])
                || a.starts_with('+')
        }),
        "reset" => rest.iter().any(|a| a == "--hard"),
        "clean" => rest.iter().any(|a| a == "--force" || short_flag(a, &['f'])),
        _ => false,
    }
}

/// `-xyz` style flag cluster containing any of `letters`
fn short_flag(arg: &str, letters: &[char]) -> bool {
    arg.len() > 1
        && arg.starts_with('-')
        && !arg.starts_with("--")
        && arg[1..].chars().any(|c| letters.contains(&c))
}

fn navigates_outside(verb: &str, args: &[String], zone: &SafeZone) -> bool {
    let targets: Vec<&String> = match verb {
        // find's paths come before the first expression token
        "find" => args
            .iter()
            .take_while(|a| !a.starts_with('-') && *a != "(" && *a != "!")
            .collect(),
        _ => args.iter().filter(|a| !a.starts_with('-') || *a == "-").collect(),
    };

    if targets.is_empty() {
        if verb == "cd" || verb == "pushd" {
            return match std::env::var("HOME") {
                Ok(home) => !zone.contains(&home),
                Err(_) => true,
            };
        }
        return false;
    }

    targets.iter().any(|target| {
        // `cd -` and unexpanded variables have no knowable target
        target.as_str() == "-"
            || target.contains('$')
            || target.contains('`')
            || !zone.contains(target)
    })
}
