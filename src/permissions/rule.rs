//! Permission rule compiler
//!
//! Turns rule strings from settings files (`"Bash"`, `"Bash(git commit *)"`,
//! `"Read(**/.env)"`) into typed matchers. Compilation happens once, when a
//! snapshot or grant is built; requests are matched against the compiled form.

use std::fmt;

use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde_json::Value;

/// Name of the shell tool
pub const BASH_TOOL: &str = "Bash";

/// Tools whose primary input is a single path
pub const PATH_TOOLS: [&str; 6] = ["Read", "Write", "Edit", "MultiEdit", "Delete", "LS"];

/// `*` stays inside one path component, `**` crosses separators
const PATH_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Input field holding the target path of a path tool
pub fn path_field(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "Read" | "Write" | "Edit" | "MultiEdit" => Some("file_path"),
        "Delete" => Some("target_file"),
        "LS" => Some("path"),
        _ => None,
    }
}

/// Target path of a path tool invocation, if the tool has one and it was supplied
///
/// A blank path is treated as missing.
pub fn target_path<'a>(tool_name: &str, input: &'a Value) -> Option<&'a str> {
    let field = path_field(tool_name)?;
    input
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|p| !p.trim().is_empty())
}

/// Full command string of a Bash invocation
pub fn bash_command(input: &Value) -> Option<&str> {
    input
        .get("command")
        .and_then(|v| v.as_str())
        .map(str::trim)
}

/// One piece of a wildcard command pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSegment {
    /// Text that must appear verbatim
    Literal(String),
    /// `*`: any run of characters, including none
    Wildcard,
}

/// A compiled permission rule
#[derive(Debug, Clone)]
pub enum PermissionRule {
    /// Any invocation of the tool
    ToolOnly { tool: String },
    /// A Bash invocation with exactly this command
    BashExact { command: String },
    /// A Bash invocation whose command matches a `*` pattern
    BashWildcard {
        segments: Vec<CommandSegment>,
        regex: Regex,
    },
    /// A path tool invocation whose target path matches a glob
    PathGlob { tool: String, pattern: Pattern },
    /// Unparseable input; never matches
    Invalid { raw: String, reason: String },
}

impl PermissionRule {
    /// Compile a rule string
    ///
    /// Never fails: malformed input becomes [`PermissionRule::Invalid`] and is
    /// logged, so one bad entry cannot keep the rest of a ruleset from loading.
    pub fn compile(raw: &str) -> Self {
        match parse(raw.trim()) {
            Ok(rule) => rule,
            Err(reason) => {
                tracing::warn!(
                    "[Rules] Ignoring invalid permission rule {:?}: {}",
                    raw,
                    reason
                );
                PermissionRule::Invalid {
                    raw: raw.to_string(),
                    reason,
                }
            }
        }
    }

    /// Rule matching any invocation of `tool`
    pub fn tool_only(tool: impl Into<String>) -> Self {
        PermissionRule::ToolOnly { tool: tool.into() }
    }

    /// Rule matching exactly one Bash command
    pub fn bash_exact(command: impl Into<String>) -> Self {
        PermissionRule::BashExact {
            command: command.into(),
        }
    }

    /// Check if this rule matches the given tool invocation
    pub fn matches(&self, tool_name: &str, input: &Value) -> bool {
        match self {
            PermissionRule::ToolOnly { tool } => tool == tool_name,
            PermissionRule::BashExact { command } => {
                tool_name == BASH_TOOL && bash_command(input) == Some(command.as_str())
            }
            PermissionRule::BashWildcard { regex, .. } => {
                tool_name == BASH_TOOL && bash_command(input).is_some_and(|c| regex.is_match(c))
            }
            PermissionRule::PathGlob { .. } => target_path(tool_name, input)
                .is_some_and(|path| self.matches_path(tool_name, path)),
            PermissionRule::Invalid { .. } => false,
        }
    }

    /// Check a path rule against an explicit path for `tool_name`
    ///
    /// Always false for rules that are not path globs.
    pub fn matches_path(&self, tool_name: &str, path: &str) -> bool {
        match self {
            PermissionRule::PathGlob { tool, pattern } => {
                tool == tool_name && pattern.matches_with(path, PATH_MATCH_OPTIONS)
            }
            _ => false,
        }
    }

    /// Whether this rule failed to compile
    pub fn is_invalid(&self) -> bool {
        matches!(self, PermissionRule::Invalid { .. })
    }

    /// Tool this rule applies to (`None` for invalid rules)
    pub fn tool(&self) -> Option<&str> {
        match self {
            PermissionRule::ToolOnly { tool } | PermissionRule::PathGlob { tool, .. } => {
                Some(tool)
            }
            PermissionRule::BashExact { .. } | PermissionRule::BashWildcard { .. } => {
                Some(BASH_TOOL)
            }
            PermissionRule::Invalid { .. } => None,
        }
    }
}

/// Compile a list of rule strings, keeping invalid ones in place
pub fn compile_all<S: AsRef<str>>(raws: &[S]) -> Vec<PermissionRule> {
    raws.iter().map(|r| PermissionRule::compile(r.as_ref())).collect()
}

fn parse(raw: &str) -> Result<PermissionRule, String> {
    if raw.is_empty() {
        return Err("empty rule".to_string());
    }

    let Some(open) = raw.find('(') else {
        if raw.contains(')') {
            return Err("unbalanced parentheses".to_string());
        }
        validate_tool_name(raw)?;
        return Ok(PermissionRule::tool_only(raw));
    };

    if !raw.ends_with(')') {
        return Err("pattern must end with ')'".to_string());
    }

    let tool = raw[..open].trim();
    validate_tool_name(tool)?;

    let pattern = raw[open + 1..raw.len() - 1].trim();
    if pattern.is_empty() {
        return Err(format!("empty pattern for {}", tool));
    }

    if tool == BASH_TOOL {
        return Ok(compile_command_pattern(pattern)?);
    }

    if PATH_TOOLS.contains(&tool) {
        let glob = Pattern::new(pattern).map_err(|e| format!("bad glob {:?}: {}", pattern, e))?;
        return Ok(PermissionRule::PathGlob {
            tool: tool.to_string(),
            pattern: glob,
        });
    }

    Err(format!("tool {} does not accept a pattern", tool))
}

fn validate_tool_name(tool: &str) -> Result<(), String> {
    let mut chars = tool.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if starts_with_letter && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        Ok(())
    } else {
        Err(format!("invalid tool name {:?}", tool))
    }
}

fn compile_command_pattern(pattern: &str) -> Result<PermissionRule, String> {
    if !pattern.contains('*') {
        return Ok(PermissionRule::bash_exact(pattern));
    }

    let mut segments = Vec::new();
    for (i, literal) in pattern.split('*').enumerate() {
        if i > 0 {
            segments.push(CommandSegment::Wildcard);
        }
        if !literal.is_empty() {
            segments.push(CommandSegment::Literal(literal.to_string()));
        }
    }

    let mut source = String::from("(?s)^");
    for segment in &segments {
        match segment {
            CommandSegment::Literal(text) => source.push_str(&regex::escape(text)),
            CommandSegment::Wildcard => source.push_str(".*"),
        }
    }
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| format!("bad command pattern: {}", e))?;
    Ok(PermissionRule::BashWildcard { segments, regex })
}

impl PartialEq for PermissionRule {
    fn eq(&self, other: &Self) -> bool {
        use PermissionRule::*;
        match (self, other) {
            (ToolOnly { tool: a }, ToolOnly { tool: b }) => a == b,
            (BashExact { command: a }, BashExact { command: b }) => a == b,
            (BashWildcard { segments: a, .. }, BashWildcard { segments: b, .. }) => a == b,
            (
                PathGlob {
                    tool: ta,
                    pattern: pa,
                },
                PathGlob {
                    tool: tb,
                    pattern: pb,
                },
            ) => ta == tb && pa == pb,
            (Invalid { raw: a, .. }, Invalid { raw: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for PermissionRule {}

/// Renders the canonical rule string, as written to settings files
impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionRule::ToolOnly { tool } => write!(f, "{}", tool),
            PermissionRule::BashExact { command } => write!(f, "{}({})", BASH_TOOL, command),
            PermissionRule::BashWildcard { segments, .. } => {
                write!(f, "{}(", BASH_TOOL)?;
                for segment in segments {
                    match segment {
                        CommandSegment::Literal(text) => write!(f, "{}", text)?,
                        CommandSegment::Wildcard => write!(f, "*")?,
                    }
                }
                write!(f, ")")
            }
            PermissionRule::PathGlob { tool, pattern } => {
                write!(f, "{}({})", tool, pattern.as_str())
            }
            PermissionRule::Invalid { raw, .. } => write!(f, "{}", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bash(command: &str) -> Value {
        json!({ "command": command })
    }

    #[test]
    fn test_compile_tool_only() {
        assert_eq!(PermissionRule::compile("Bash"), PermissionRule::tool_only("Bash"));
        assert_eq!(
            PermissionRule::compile("  mcp__github__create_pr "),
            PermissionRule::tool_only("mcp__github__create_pr")
        );
    }

    #[test]
    fn test_compile_bash_exact_and_wildcard() {
        assert_eq!(
            PermissionRule::compile("Bash(git status)"),
            PermissionRule::bash_exact("git status")
        );

        let rule = PermissionRule::compile("Bash(git commit *)");
        match &rule {
            PermissionRule::BashWildcard { segments, .. } => assert_eq!(
                segments,
                &vec![
                    CommandSegment::Literal("git commit ".to_string()),
                    CommandSegment::Wildcard
                ]
            ),
            other => panic!("expected wildcard, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_path_glob() {
        let rule = PermissionRule::compile("Read(**/.env)");
        assert!(matches!(rule, PermissionRule::PathGlob { ref tool, .. } if tool == "Read"));
    }

    #[test]
    fn test_compile_invalid_inputs() {
        for raw in [
            "",
            "   ",
            "Bash(",
            "Bash(ls",
            "Bash)",
            "Bash()",
            "(ls)",
            "1Tool",
            "Grep(foo)",
            "Read(src**)",
            "bad name",
        ] {
            let rule = PermissionRule::compile(raw);
            assert!(rule.is_invalid(), "{:?} should be invalid, got {:?}", raw, rule);
            assert!(!rule.matches("Bash", &bash("ls")));
        }
    }

    #[test]
    fn test_compile_all_keeps_going_after_bad_rule() {
        let rules = compile_all(&["Bash(", "Read", "Bash(ls)"]);
        assert_eq!(rules.len(), 3);
        assert!(rules[0].is_invalid());
        assert!(rules[1].matches("Read", &json!({ "file_path": "/x" })));
        assert!(rules[2].matches("Bash", &bash("ls")));
    }

    #[test]
    fn test_tool_only_is_case_sensitive() {
        let rule = PermissionRule::compile("Bash");
        assert!(rule.matches("Bash", &bash("anything")));
        assert!(!rule.matches("bash", &bash("anything")));
        assert!(!rule.matches("Read", &json!({})));
    }

    #[test]
    fn test_bash_exact_matches_full_command_only() {
        let rule = PermissionRule::compile("Bash(git status)");
        assert!(rule.matches("Bash", &bash("git status")));
        assert!(rule.matches("Bash", &bash("  git status  ")));
        assert!(!rule.matches("Bash", &bash("git status --short")));
        assert!(!rule.matches("Bash", &json!({})));
        assert!(!rule.matches("Write", &bash("git status")));
    }

    #[test]
    fn test_bash_wildcard_positions() {
        let trailing = PermissionRule::compile("Bash(git commit *)");
        assert!(trailing.matches("Bash", &bash("git commit -m x")));
        assert!(trailing.matches("Bash", &bash("git commit --amend")));
        assert!(!trailing.matches("Bash", &bash("git commit")));
        assert!(!trailing.matches("Bash", &bash("git push")));

        let leading = PermissionRule::compile("Bash(* --version)");
        assert!(leading.matches("Bash", &bash("cargo --version")));
        assert!(!leading.matches("Bash", &bash("cargo --version && rm x")));

        let repeated = PermissionRule::compile("Bash(npm * -- *)");
        assert!(repeated.matches("Bash", &bash("npm run test -- --watch")));
        assert!(!repeated.matches("Bash", &bash("npm run test")));
    }

    #[test]
    fn test_bash_wildcard_escapes_regex_metacharacters() {
        let rule = PermissionRule::compile("Bash(echo (a+b)? *)");
        assert!(rule.matches("Bash", &bash("echo (a+b)? done")));
        assert!(!rule.matches("Bash", &bash("echo aab done")));
    }

    #[test]
    fn test_wildcard_spans_newlines() {
        let rule = PermissionRule::compile("Bash(python -c *)");
        assert!(rule.matches("Bash", &bash("python -c 'import os\nprint(1)'")));
    }

    #[test]
    fn test_legacy_colon_star_is_literal() {
        let rule = PermissionRule::compile("Bash(npm:*)");
        assert!(rule.matches("Bash", &bash("npm:install")));
        assert!(!rule.matches("Bash", &bash("npm install")));
    }

    #[test]
    fn test_path_glob_matching() {
        let env = PermissionRule::compile("Read(**/.env)");
        assert!(env.matches("Read", &json!({ "file_path": "/proj/sub/.env" })));
        assert!(env.matches("Read", &json!({ "file_path": ".env" })));
        assert!(!env.matches("Read", &json!({ "file_path": "/proj/.env.example" })));
        assert!(!env.matches("Write", &json!({ "file_path": "/proj/.env" })));

        let src = PermissionRule::compile("Edit(src/*.rs)");
        assert!(src.matches("Edit", &json!({ "file_path": "src/lib.rs" })));
        assert!(!src.matches("Edit", &json!({ "file_path": "src/permissions/rule.rs" })));

        let one = PermissionRule::compile("Write(/tmp/?.txt)");
        assert!(one.matches("Write", &json!({ "file_path": "/tmp/a.txt" })));
        assert!(!one.matches("Write", &json!({ "file_path": "/tmp/ab.txt" })));
    }

    #[test]
    fn test_path_glob_uses_tool_specific_field() {
        let delete = PermissionRule::compile("Delete(/proj/**)");
        assert!(delete.matches("Delete", &json!({ "target_file": "/proj/a/b" })));
        assert!(!delete.matches("Delete", &json!({ "file_path": "/proj/a/b" })));

        let ls = PermissionRule::compile("LS(/proj/**)");
        assert!(ls.matches("LS", &json!({ "path": "/proj/src" })));
        assert!(!ls.matches("LS", &json!({})));
    }

    #[test]
    fn test_blank_path_is_no_target() {
        assert_eq!(target_path("Write", &json!({ "file_path": "" })), None);
        assert_eq!(target_path("Write", &json!({ "file_path": "  " })), None);
        let any = PermissionRule::compile("Write(**)");
        assert!(!any.matches("Write", &json!({ "file_path": "" })));
    }

    #[test]
    fn test_matches_path() {
        let etc = PermissionRule::compile("Write(/etc/**)");
        assert!(etc.matches_path("Write", "/etc/passwd"));
        assert!(!etc.matches_path("Read", "/etc/passwd"));
        assert!(!PermissionRule::compile("Write").matches_path("Write", "/etc/passwd"));
    }

    #[test]
    fn test_display_round_trips() {
        for raw in [
            "Bash",
            "Bash(git status)",
            "Bash(git commit *)",
            "Bash(*)",
            "Read(**/.env)",
            "Delete(/proj/tmp/*)",
        ] {
            let rule = PermissionRule::compile(raw);
            assert_eq!(rule.to_string(), raw);
            assert_eq!(PermissionRule::compile(&rule.to_string()), rule);
        }
    }

    #[test]
    fn test_rule_tool() {
        assert_eq!(PermissionRule::compile("Bash(ls *)").tool(), Some("Bash"));
        assert_eq!(PermissionRule::compile("LS(/a)").tool(), Some("LS"));
        assert_eq!(PermissionRule::compile("Grep(x)").tool(), None);
    }
}
