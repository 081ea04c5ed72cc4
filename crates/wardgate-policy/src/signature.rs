//! Canonical signature construction.
//!
//! A signature is the human-readable `tool(part, part)` string used as the
//! policy-matching key and shown verbatim in approval prompts:
//!
//! ```
//! use wardgate_policy::build_signature;
//!
//! let args = serde_json::json!({
//!     "domain": "light",
//!     "service": "turn_on",
//!     "entity_id": "light.bedroom",
//! });
//! let args = args.as_object().unwrap().clone();
//! let sig = build_signature("ha_call_service", &args).unwrap();
//! assert_eq!(sig, "ha_call_service(light.turn_on, light.bedroom)");
//! ```

use serde_json::Value;
use wardgate_core::ToolArgs;

use crate::error::PolicyResult;
use crate::validate::validate_args;

/// Render a JSON value as a signature part: strings bare, everything else
/// in compact JSON form.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fetch a string-ish argument, defaulting to empty when absent.
fn arg(args: &ToolArgs, key: &str) -> String {
    args.get(key).map(render).unwrap_or_default()
}

/// Ordered signature parts for a known tool, or `None` for the fallback.
fn builtin_parts(tool_name: &str, args: &ToolArgs) -> Option<Vec<String>> {
    match tool_name {
        "ha_call_service" => Some(vec![
            format!("{}.{}", arg(args, "domain"), arg(args, "service")),
            arg(args, "entity_id"),
        ]),
        "ha_get_state" => Some(vec![arg(args, "entity_id")]),
        "ha_get_states" => Some(Vec::new()),
        "ha_fire_event" => Some(vec![arg(args, "event_type")]),
        _ => None,
    }
}

/// Build the deterministic signature for `(tool_name, args)`.
///
/// Validation runs first, so a successfully built signature can never
/// contain glob metacharacters from argument values. Unknown tools fall
/// back to rendering values in lexicographic key order, which keeps the
/// result independent of serialization order.
///
/// # Errors
///
/// Propagates validation failures from [`validate_args`].
pub fn build_signature(tool_name: &str, args: &ToolArgs) -> PolicyResult<String> {
    validate_args(tool_name, args)?;

    let parts = builtin_parts(tool_name, args).unwrap_or_else(|| {
        let mut keys: Vec<&String> = args.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| render(&args[k.as_str()]))
            .collect()
    });

    if parts.is_empty() {
        Ok(tool_name.to_string())
    } else {
        Ok(format!("{tool_name}({})", parts.join(", ")))
    }
}
