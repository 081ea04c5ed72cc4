//! Wardgate Policy — the deterministic half of the gateway.
//!
//! Three layers, applied in order for every request:
//!
//! 1. [`validate::validate_args`] rejects forbidden characters before any
//!    signature exists, so nothing the agent sends can influence glob
//!    matching.
//! 2. [`signature::build_signature`] renders the canonical
//!    `tool(part, part)` string used both as the policy-matching key and as
//!    the text shown to the human approver.
//! 3. [`engine::PermissionEngine`] evaluates the signature against the rule
//!    set: deny rules first, then allow, then ask, then first-match
//!    defaults, then a global `ask` fallback.
//!
//! Everything in this crate is pure; evaluating a policy never performs I/O.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod engine;
pub mod error;
pub mod rules;
pub mod signature;
pub mod validate;

pub use engine::PermissionEngine;
pub use error::{PolicyError, PolicyResult};
pub use rules::{PermissionRule, Permissions};
pub use signature::build_signature;
pub use validate::validate_args;
