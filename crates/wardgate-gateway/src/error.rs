//! Gateway error types.

use thiserror::Error;

/// Errors surfaced while serving connections or orchestrating approvals.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Durable store failure.
    #[error("storage error: {0}")]
    Storage(#[from] wardgate_storage::StorageError),

    /// Policy compilation failure at startup.
    #[error("policy error: {0}")]
    Policy(#[from] wardgate_policy::PolicyError),

    /// WebSocket transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Listener socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS material could not be loaded.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Convenience alias.
pub type GatewayResult<T> = Result<T, GatewayError>;
