//! Configuration error types. All of these are fatal at startup.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A referenced document does not exist.
    #[error("config file not found: {0}")]
    NotFound(String),

    /// The document is not valid TOML or does not match the schema.
    #[error("config parse error: {0}")]
    Parse(String),

    /// A `${VAR}` reference names an unset environment variable.
    #[error("environment variable {0} is not set")]
    UnsetVariable(String),

    /// A required field is missing or a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Reading a document failed.
    #[error("I/O error reading {path}: {reason}")]
    Io {
        /// The document path.
        path: String,
        /// Underlying error detail.
        reason: String,
    },
}

/// Convenience alias.
pub type ConfigResult<T> = Result<T, ConfigError>;
