//! Permission rule model.

use serde::{Deserialize, Serialize};
use wardgate_core::Decision;

/// One declarative permission entry: a shell-style glob over signatures and
/// the action taken on match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Shell-wildcard pattern (`*`, `?`, `[set]`) matched against signatures.
    pub pattern: String,
    /// Action on match.
    pub action: Decision,
    /// Operator-facing note; never interpreted.
    #[serde(default)]
    pub description: String,
}

impl PermissionRule {
    /// Construct a rule without a description.
    #[must_use]
    pub fn new(pattern: impl Into<String>, action: Decision) -> Self {
        Self {
            pattern: pattern.into(),
            action,
            description: String::new(),
        }
    }
}

/// The full policy document: `defaults` are first-match, `rules` are
/// evaluated in three passes with deny taking absolute precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// First-match fallback policy, consulted only when no rule matches.
    #[serde(default)]
    pub defaults: Vec<PermissionRule>,
    /// Multi-pass policy: deny, then allow, then ask.
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
}
