//! Wardgate Core — shared data model and component contracts.
//!
//! The gateway sits between an untrusted agent and privileged downstream
//! services. This crate holds the types every other crate agrees on:
//!
//! - the request/result/audit data model ([`types`])
//! - the messenger adapter boundary ([`messenger`])
//! - the service handler boundary ([`service`])
//! - epoch-seconds helpers ([`time`])
//!
//! Policy evaluation, persistence, and the approval orchestrator live in
//! their own crates and depend on this one.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod messenger;
pub mod service;
pub mod time;
pub mod types;

pub use messenger::{
    ApprovalAction, ApprovalCallback, ApprovalPrompt, ApprovalResponse, MessengerAdapter,
    MessengerError, SentPrompt,
};
pub use service::{ExecutionError, ServiceHandler};
pub use types::{
    AuditEntry, Decision, PendingRecord, Resolution, ToolArgs, ToolRequest, ToolResult,
    ToolResultStatus,
};
