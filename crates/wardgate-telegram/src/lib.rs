//! Wardgate Telegram — the guardian's side of the approval flow.
//!
//! Approval prompts are Telegram messages with an Allow/Deny inline
//! keyboard. This crate is the only place allowed-user filtering happens:
//! button presses from anyone outside the configured allowlist are
//! silently discarded, so the orchestrator can trust every callback it
//! receives.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod adapter;
pub mod callback;

pub use adapter::TelegramAdapter;
