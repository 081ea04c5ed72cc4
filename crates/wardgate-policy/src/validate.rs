//! Argument validation.
//!
//! Runs before signature construction so forbidden characters can never
//! appear in the string the engine matches against.

use serde_json::Value;
use wardgate_core::ToolArgs;

use crate::error::{PolicyError, PolicyResult};

/// Reserved namespace prefix for Home Assistant tools.
const HA_PREFIX: &str = "ha_";

/// Argument keys that must be identifier-shaped on `ha_*` tools.
const HA_IDENTIFIER_KEYS: &[&str] = &["entity_id", "domain", "service", "event_type"];

/// Characters rejected in any string argument: glob metacharacters that
/// would let an agent inject pattern syntax into a signature, plus the
/// signature's own delimiters, plus control bytes.
fn is_forbidden(c: char) -> bool {
    matches!(c, '*' | '?' | '[' | ']' | '(' | ')' | ',') || c <= '\u{1f}'
}

/// Whether `s` matches `^[a-z_][a-z0-9_]*(\.[a-z0-9_]+)?$`, the shape of a
/// Home Assistant domain, service, entity id, or event type.
fn is_ha_identifier(s: &str) -> bool {
    let mut segments = s.splitn(2, '.');
    let Some(head) = segments.next() else {
        return false;
    };
    let tail = segments.next();

    let mut chars = head.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {},
        _ => return false,
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return false;
    }

    match tail {
        None => true,
        Some(seg) => {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        },
    }
}

/// Validate every argument value for `tool_name`.
///
/// Non-string values pass through untouched. String values are rejected if
/// they contain forbidden characters; on `ha_*` tools, identifier-carrying
/// keys must additionally be identifier-shaped.
///
/// # Errors
///
/// [`PolicyError::ForbiddenCharacters`] or [`PolicyError::InvalidIdentifier`]
/// naming the offending key (never its value).
pub fn validate_args(tool_name: &str, args: &ToolArgs) -> PolicyResult<()> {
    for (key, value) in args {
        let Value::String(s) = value else {
            continue;
        };
        if s.chars().any(is_forbidden) {
            return Err(PolicyError::ForbiddenCharacters(key.clone()));
        }
        if tool_name.starts_with(HA_PREFIX)
            && HA_IDENTIFIER_KEYS.contains(&key.as_str())
            && !is_ha_identifier(s)
        {
            return Err(PolicyError::InvalidIdentifier(key.clone()));
        }
    }
    Ok(())
}
