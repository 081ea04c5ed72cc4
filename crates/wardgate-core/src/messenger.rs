//! Messenger adapter boundary.
//!
//! The orchestrator talks to the out-of-band approval channel (Telegram in
//! the reference deployment) exclusively through [`MessengerAdapter`]. The
//! adapter is the only component that enforces allowed-user filtering; the
//! orchestrator assumes every callback it receives came from an allowed user.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors surfaced by a messenger backend.
#[derive(Debug, Error)]
pub enum MessengerError {
    /// Sending the approval prompt failed.
    #[error("failed to send approval prompt: {0}")]
    Send(String),

    /// Starting or stopping the backend failed.
    #[error("messenger lifecycle error: {0}")]
    Lifecycle(String),
}

/// What a human can do with an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAction {
    /// Execute the suspended request.
    Allow,
    /// Reject the suspended request.
    Deny,
}

impl ApprovalAction {
    /// The affordances shown on every prompt, in display order.
    pub const ALL: [Self; 2] = [Self::Allow, Self::Deny];

    /// Wire token used in callback data.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    /// Button label shown to the human.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }

    /// Parse a wire token.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The prompt the orchestrator asks the messenger to post.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    /// Correlation id of the suspended request.
    pub request_id: String,
    /// Human-readable signature, e.g. `ha_call_service(light.turn_on, light.bedroom)`.
    pub signature: String,
}

/// What the messenger returns after posting a prompt.
#[derive(Debug, Clone)]
pub struct SentPrompt {
    /// Opaque message id usable for later edits.
    pub message_id: String,
    /// Chat the prompt landed in, if the backend has such a notion.
    pub chat_id: Option<i64>,
}

/// A human decision relayed by the messenger.
///
/// Only decisions from allowed users reach the orchestrator; the adapter
/// silently discards everyone else's button presses.
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    /// Correlation id of the request being decided.
    pub request_id: String,
    /// The chosen action.
    pub action: ApprovalAction,
    /// Stable identifier of the deciding user (for the audit trail).
    pub user_id: String,
    /// Display name, when the backend knows one.
    pub username: Option<String>,
    /// Epoch seconds at which the decision was made.
    pub timestamp: f64,
}

impl ApprovalResponse {
    /// Name to show in message edits: the username when known, else the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.user_id)
    }
}

/// Callback invoked by the adapter when an allowed user decides.
pub type ApprovalCallback =
    Box<dyn Fn(ApprovalResponse) -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// Capability set the orchestrator requires from an approval channel.
#[async_trait]
pub trait MessengerAdapter: Send + Sync {
    /// Post an approval prompt showing the signature with Allow/Deny
    /// affordances. Returns an opaque handle usable for later edits.
    async fn send_approval(&self, prompt: &ApprovalPrompt) -> Result<SentPrompt, MessengerError>;

    /// Edit a previously posted prompt to reflect the outcome.
    ///
    /// Best-effort: implementations log failures and never propagate them.
    async fn update_approval(&self, message_id: &str, status: &str, detail: &str);

    /// Register the function invoked when an allowed user picks an action.
    async fn set_callback(&self, callback: ApprovalCallback);

    /// Start listening for user decisions.
    async fn start(&self) -> Result<(), MessengerError>;

    /// Stop listening and release backend resources.
    async fn stop(&self);
}
