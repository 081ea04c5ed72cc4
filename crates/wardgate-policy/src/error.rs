//! Policy error types.

use thiserror::Error;

/// Errors produced while validating arguments or compiling rules.
///
/// Variants never embed raw argument values; only the offending key is
/// named, so these messages are safe to log and to map onto wire errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// An argument value contains glob metacharacters or control bytes.
    #[error("argument '{0}' contains forbidden characters")]
    ForbiddenCharacters(String),

    /// An identifier-shaped argument does not match the required form.
    #[error("argument '{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    /// A rule pattern failed to compile as a glob.
    #[error("invalid permission pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern text.
        pattern: String,
        /// Compiler error detail.
        reason: String,
    },
}

/// Convenience alias.
pub type PolicyResult<T> = Result<T, PolicyError>;
