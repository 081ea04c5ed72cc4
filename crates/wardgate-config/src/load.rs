//! Document loading: read, substitute, parse, validate.

use std::collections::HashMap;
use std::path::Path;

use wardgate_policy::Permissions;

use crate::env::{collect_env_vars, substitute_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

fn read_document(path: &Path) -> ConfigResult<toml::Value> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn load_substituted(path: &Path, env: &HashMap<String, String>) -> ConfigResult<toml::Value> {
    let mut value = read_document(path)?;
    substitute_env_vars(&mut value, env)?;
    Ok(value)
}

/// Load and validate the runtime configuration document.
///
/// # Errors
///
/// Any [`ConfigError`]; all are fatal at startup.
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    load_config_with_env(path, &collect_env_vars())
}

/// [`load_config`] with an explicit environment (for tests).
///
/// # Errors
///
/// Any [`ConfigError`]; all are fatal at startup.
pub fn load_config_with_env(
    path: &Path,
    env: &HashMap<String, String>,
) -> ConfigResult<Config> {
    let value = load_substituted(path, env)?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load the policy document.
///
/// # Errors
///
/// Any [`ConfigError`]; all are fatal at startup.
pub fn load_permissions(path: &Path) -> ConfigResult<Permissions> {
    load_permissions_with_env(path, &collect_env_vars())
}

/// [`load_permissions`] with an explicit environment (for tests).
///
/// # Errors
///
/// Any [`ConfigError`]; all are fatal at startup.
pub fn load_permissions_with_env(
    path: &Path,
    env: &HashMap<String, String>,
) -> ConfigResult<Permissions> {
    let value = load_substituted(path, env)?;
    let permissions: Permissions = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;

    // serde already constrained actions to allow/deny/ask; reject empty
    // patterns here so the engine never compiles a match-nothing glob the
    // operator didn't write.
    for rule in permissions.defaults.iter().chain(&permissions.rules) {
        if rule.pattern.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "permission rule with action {:?} has an empty pattern",
                rule.action
            )));
        }
    }
    Ok(permissions)
}
