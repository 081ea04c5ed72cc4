//! Data model shared across the gateway.
//!
//! In-memory timestamps are epoch-seconds floats; the storage crate converts
//! to ISO-8601 text at its boundary and nowhere else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool arguments: string keys mapping to arbitrary JSON values.
pub type ToolArgs = serde_json::Map<String, Value>;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Execute immediately.
    Allow,
    /// Reject immediately.
    Deny,
    /// Suspend and solicit human approval.
    Ask,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            "ask" => Ok(Self::Ask),
            other => Err(format!("invalid permission action: {other:?}")),
        }
    }
}

/// An incoming tool request from the agent.
///
/// The `id` is the agent-chosen correlation id; the signature is filled in
/// by the permission engine before any decision is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Agent-chosen correlation id.
    pub id: String,
    /// Tool name, e.g. `ha_call_service`.
    pub tool_name: String,
    /// Tool arguments.
    pub args: ToolArgs,
    /// Canonical signature, e.g. `ha_call_service(light.turn_on, light.bedroom)`.
    #[serde(default)]
    pub signature: String,
}

impl ToolRequest {
    /// Create a request with an empty signature.
    #[must_use]
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, args: ToolArgs) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            args,
            signature: String::new(),
        }
    }
}

/// Final status of a tool request as seen by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    /// The action ran against the downstream service.
    Executed,
    /// The action was refused (policy, user, or timeout).
    Denied,
}

impl fmt::Display for ToolResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed => write!(f, "executed"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Result of a resolved tool request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation id of the originating request.
    pub request_id: String,
    /// Final status.
    pub status: ToolResultStatus,
    /// Payload: handler output for executed requests, a short reason
    /// string for denied ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    /// An executed result carrying handler output.
    #[must_use]
    pub fn executed(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: ToolResultStatus::Executed,
            data: Some(data),
        }
    }

    /// A denied result carrying a reason.
    #[must_use]
    pub fn denied(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ToolResultStatus::Denied,
            data: Some(Value::String(reason.into())),
        }
    }
}

/// How a request ultimately ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The executor ran the action.
    Executed,
    /// A human pressed Deny.
    DeniedByUser,
    /// The policy (or validator) rejected it without human involvement.
    DeniedByPolicy,
    /// The approval window elapsed.
    Timeout,
    /// The gateway shut down with the approval still pending.
    GatewayShutdown,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed => write!(f, "executed"),
            Self::DeniedByUser => write!(f, "denied_by_user"),
            Self::DeniedByPolicy => write!(f, "denied_by_policy"),
            Self::Timeout => write!(f, "timeout"),
            Self::GatewayShutdown => write!(f, "gateway_shutdown"),
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(Self::Executed),
            "denied_by_user" => Ok(Self::DeniedByUser),
            "denied_by_policy" => Ok(Self::DeniedByPolicy),
            "timeout" => Ok(Self::Timeout),
            "gateway_shutdown" => Ok(Self::GatewayShutdown),
            other => Err(format!("invalid resolution: {other:?}")),
        }
    }
}

/// One row of the append-only audit trail.
///
/// Written exactly once per accepted request, at resolution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Correlation id of the request.
    pub request_id: String,
    /// Epoch seconds at entry construction.
    pub timestamp: f64,
    /// Tool name.
    pub tool_name: String,
    /// Tool arguments as received.
    pub args: ToolArgs,
    /// Canonical signature (empty if validation failed before building one).
    pub signature: String,
    /// Engine decision.
    pub decision: Decision,
    /// Final resolution.
    pub resolution: Option<Resolution>,
    /// Who resolved it: a user id, or `policy` / `timeout` / `shutdown` /
    /// `validator`.
    pub resolved_by: Option<String>,
    /// Epoch seconds at resolution.
    pub resolved_at: Option<f64>,
    /// Executor output or `{"error": ...}` for failed executions.
    pub execution_result: Option<Value>,
    /// Originating agent (single-agent v1: always `default`).
    pub agent_id: String,
}

impl AuditEntry {
    /// Start an entry for a request; resolution fields are filled by the
    /// builder-style setters below.
    #[must_use]
    pub fn new(request: &ToolRequest, decision: Decision) -> Self {
        Self {
            request_id: request.id.clone(),
            timestamp: crate::time::now_epoch(),
            tool_name: request.tool_name.clone(),
            args: request.args.clone(),
            signature: request.signature.clone(),
            decision,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            execution_result: None,
            agent_id: "default".to_string(),
        }
    }

    /// Set resolution, resolver, and the resolution timestamp.
    #[must_use]
    pub fn resolved(mut self, resolution: Resolution, resolved_by: impl Into<String>) -> Self {
        self.resolution = Some(resolution);
        self.resolved_by = Some(resolved_by.into());
        self.resolved_at = Some(crate::time::now_epoch());
        self
    }

    /// Attach the executor output (or error object).
    #[must_use]
    pub fn with_execution_result(mut self, result: Value) -> Self {
        self.execution_result = Some(result);
        self
    }
}

/// Durable twin of an in-flight `ask` request.
///
/// The `result` field is populated only when the request resolves while the
/// agent is disconnected; such rows are claimed on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Correlation id (primary key).
    pub request_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Tool arguments.
    pub args: ToolArgs,
    /// Canonical signature.
    pub signature: String,
    /// Messenger message id, once the prompt is posted.
    pub message_id: Option<String>,
    /// Messenger chat id, once the prompt is posted.
    pub chat_id: Option<i64>,
    /// Serialized [`ToolResult`] queued for an offline agent.
    pub result: Option<String>,
    /// Epoch seconds at creation.
    pub created_at: f64,
    /// Epoch seconds at which the approval window closes.
    pub expires_at: f64,
}

impl PendingRecord {
    /// Build a record for a freshly suspended request.
    #[must_use]
    pub fn new(request: &ToolRequest, created_at: f64, expires_at: f64) -> Self {
        Self {
            request_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            args: request.args.clone(),
            signature: request.signature.clone(),
            message_id: None,
            chat_id: None,
            result: None,
            created_at,
            expires_at,
        }
    }
}
