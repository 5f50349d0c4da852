//! Hook Registry
//!
//! Contains:
//! - `Hook` trait - for implementing in-process pre-tool-use hooks
//! - `HookMatcher` - matches tools by regex pattern
//! - `HookRegistry` - stores and runs hooks

use std::sync::Arc;

use regex::Regex;

use super::types::{combine_results, HookContext, HookDecision, PermissionDecision};

/// Trait for hook implementations
///
/// Returning `None` means "no opinion"; the rules decide.
pub trait Hook: Send + Sync {
    fn call(&self, ctx: &HookContext<'_>) -> Option<HookDecision>;
}

/// Implement Hook for closures
impl<F> Hook for F
where
    F: for<'a> Fn(&HookContext<'a>) -> Option<HookDecision> + Send + Sync,
{
    fn call(&self, ctx: &HookContext<'_>) -> Option<HookDecision> {
        (self)(ctx)
    }
}

/// Type alias for stored hooks
pub type ArcHook = Arc<dyn Hook>;

/// Matches tools by name pattern and executes a hook
pub struct HookMatcher {
    /// Regex pattern to match tool names (None = match all)
    pattern: Option<Regex>,
    hook: ArcHook,
}

impl HookMatcher {
    /// Create a matcher that matches all tools
    pub fn new<H: Hook + 'static>(hook: H) -> Self {
        Self {
            pattern: None,
            hook: Arc::new(hook),
        }
    }

    /// Create a matcher with a regex pattern
    ///
    /// Pattern examples:
    /// - `"Bash"` - match only Bash tool
    /// - `"Write|Edit|MultiEdit"` - match file tools
    /// - `"^mcp__"` - match all MCP tools
    pub fn with_pattern<H: Hook + 'static>(pattern: &str, hook: H) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
            hook: Arc::new(hook),
        })
    }

    /// Check if this matcher applies to a tool name
    pub fn matches(&self, tool_name: &str) -> bool {
        match &self.pattern {
            Some(regex) => regex.is_match(tool_name),
            None => true,
        }
    }

    pub fn run(&self, ctx: &HookContext<'_>) -> Option<HookDecision> {
        self.hook.call(ctx)
    }
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("pattern", &self.pattern.as_ref().map(|r| r.as_str()))
            .finish()
    }
}

/// Registry of in-process pre-tool-use hooks
///
/// # Example
///
/// ```ignore
/// let mut hooks = HookRegistry::new();
///
/// hooks.add_with_pattern("Bash", |ctx: &HookContext| {
///     ctx.command()
///         .filter(|cmd| cmd.contains("kubectl"))
///         .map(|_| HookDecision::deny("cluster access goes through the deploy bot"))
/// })?;
/// ```
#[derive(Default)]
pub struct HookRegistry {
    matchers: Vec<HookMatcher>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook that matches all tools
    pub fn add<H: Hook + 'static>(&mut self, hook: H) -> &mut Self {
        self.matchers.push(HookMatcher::new(hook));
        self
    }

    /// Add a hook with a tool name pattern
    pub fn add_with_pattern<H: Hook + 'static>(
        &mut self,
        pattern: &str,
        hook: H,
    ) -> Result<&mut Self, regex::Error> {
        self.matchers.push(HookMatcher::with_pattern(pattern, hook)?);
        Ok(self)
    }

    /// Add a pre-built matcher
    pub fn add_matcher(&mut self, matcher: HookMatcher) -> &mut Self {
        self.matchers.push(matcher);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Run every hook matching the tool and combine their decisions
    ///
    /// All matching hooks run, even after one denies, so audit hooks always
    /// fire. Results combine as Deny > Allow > Ask > no override.
    pub fn run(&self, ctx: &HookContext<'_>) -> Option<HookDecision> {
        let mut combined = None;
        for matcher in self.matchers.iter().filter(|m| m.matches(ctx.tool_name)) {
            let result = matcher.run(ctx);
            if let Some(decision) = &result {
                tracing::debug!(
                    "[HookRegistry] Hook returned {} for {}",
                    decision.decision,
                    ctx.tool_name
                );
            }
            combined = combine_results(combined, result);
        }

        if combined
            .as_ref()
            .is_some_and(|d| d.decision == PermissionDecision::Deny)
        {
            tracing::info!("[HookRegistry] {} denied by in-process hook", ctx.tool_name);
        }
        combined
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.matchers).finish()
    }
}
