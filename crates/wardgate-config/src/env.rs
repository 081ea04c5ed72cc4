//! `${VAR}` reference resolution over a TOML document tree.
//!
//! Substitution walks every string leaf recursively. Unlike a shell, there
//! is no default syntax and no silent passthrough: a reference to an unset
//! variable aborts startup, so a typoed secret name cannot become a literal
//! `${TYPO}` credential.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};

/// Resolve `${VAR}` references in all string values of `value`, in place.
///
/// # Errors
///
/// [`ConfigError::UnsetVariable`] if a referenced variable is missing from
/// `env_vars`.
pub fn substitute_env_vars<S: ::std::hash::BuildHasher>(
    value: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<()> {
    match value {
        toml::Value::String(s) => {
            *s = resolve_string_refs(s, env_vars)?;
            Ok(())
        },
        toml::Value::Table(table) => {
            for (_, child) in table.iter_mut() {
                substitute_env_vars(child, env_vars)?;
            }
            Ok(())
        },
        toml::Value::Array(arr) => {
            for child in arr.iter_mut() {
                substitute_env_vars(child, env_vars)?;
            }
            Ok(())
        },
        _ => Ok(()),
    }
}

/// Replace `${VAR}` references in one string.
fn resolve_string_refs<S: ::std::hash::BuildHasher>(
    input: &str,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<String> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;

            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                var_name.push(ch);
            }

            if closed && !var_name.is_empty() {
                match env_vars.get(&var_name) {
                    Some(val) => result.push_str(val),
                    None => return Err(ConfigError::UnsetVariable(var_name)),
                }
            } else {
                // Malformed reference: keep it literal.
                result.push('$');
                result.push('{');
                result.push_str(&var_name);
            }
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Snapshot the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}
