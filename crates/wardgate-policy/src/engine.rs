//! Permission engine: three-pass rule evaluation over signatures.

use globset::{GlobBuilder, GlobMatcher};
use wardgate_core::{Decision, ToolArgs};

use crate::error::{PolicyError, PolicyResult};
use crate::rules::{PermissionRule, Permissions};
use crate::signature::build_signature;

/// A rule with its glob compiled once at engine construction.
struct CompiledRule {
    action: Decision,
    matcher: GlobMatcher,
}

impl CompiledRule {
    fn compile(rule: &PermissionRule) -> PolicyResult<Self> {
        // literal_separator stays off so `*` spans every character, giving
        // shell-wildcard semantics over signatures rather than path semantics.
        let glob = GlobBuilder::new(&rule.pattern)
            .literal_separator(false)
            .build()
            .map_err(|e| PolicyError::InvalidPattern {
                pattern: rule.pattern.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            action: rule.action,
            matcher: glob.compile_matcher(),
        })
    }

    fn matches(&self, signature: &str) -> bool {
        self.matcher.is_match(signature)
    }
}

/// Evaluates tool requests against a compiled permission set.
///
/// Evaluation is pure and O(rules): one ordered scan per action over
/// `rules`, then one first-match scan over `defaults`, then the global
/// `ask` fallback. A matching deny rule wins no matter what other rules
/// say: an operator's `deny` can never be shadowed by a more specific
/// `allow`.
pub struct PermissionEngine {
    rules: Vec<CompiledRule>,
    defaults: Vec<CompiledRule>,
}

impl PermissionEngine {
    /// Compile a permission set.
    ///
    /// # Errors
    ///
    /// [`PolicyError::InvalidPattern`] if any glob fails to compile; the
    /// engine refuses to exist with a partially valid policy.
    pub fn new(permissions: &Permissions) -> PolicyResult<Self> {
        Ok(Self {
            rules: permissions
                .rules
                .iter()
                .map(CompiledRule::compile)
                .collect::<PolicyResult<_>>()?,
            defaults: permissions
                .defaults
                .iter()
                .map(CompiledRule::compile)
                .collect::<PolicyResult<_>>()?,
        })
    }

    /// Validate, build the signature, and evaluate it.
    ///
    /// Returns the decision together with the signature so callers audit
    /// and display exactly the string that was matched.
    ///
    /// # Errors
    ///
    /// Propagates validation failures; the engine never swallows them.
    pub fn evaluate(&self, tool_name: &str, args: &ToolArgs) -> PolicyResult<(Decision, String)> {
        let signature = build_signature(tool_name, args)?;
        let decision = self.evaluate_signature(&signature);
        Ok((decision, signature))
    }

    /// Evaluate an already-built signature.
    #[must_use]
    pub fn evaluate_signature(&self, signature: &str) -> Decision {
        for action in [Decision::Deny, Decision::Allow, Decision::Ask] {
            for rule in &self.rules {
                if rule.action == action && rule.matches(signature) {
                    return action;
                }
            }
        }

        for default in &self.defaults {
            if default.matches(signature) {
                return default.action;
            }
        }

        Decision::Ask
    }
}
