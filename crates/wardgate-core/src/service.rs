//! Service handler boundary.
//!
//! The executor dispatches approved tool requests to downstream services
//! through [`ServiceHandler`]. Handlers own their transport (HTTP clients,
//! credentials) and never see policy decisions.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::types::ToolArgs;

/// Raised when tool dispatch or downstream execution fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl ExecutionError {
    /// Build an error from anything displayable.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Capability set the executor requires from a downstream service.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Execute a tool call and return the service's JSON result.
    async fn execute(&self, tool_name: &str, args: &ToolArgs) -> Result<Value, ExecutionError>;

    /// Whether the service is currently reachable. Never fails; used only
    /// for a startup warning.
    async fn health_check(&self) -> bool;

    /// Release transport resources.
    async fn close(&self);
}
