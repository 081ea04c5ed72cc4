//! Wardgate Gateway — the approval orchestrator and its transport.
//!
//! One agent connection at a time speaks framed JSON-RPC 2.0 over a
//! WebSocket. Requests flow through the rate limiter, the argument
//! validator, the signature builder, and the permission engine; `ask`
//! verdicts suspend until a human decision, a timeout, or shutdown
//! resolves them. Resolution is race-free: whichever path removes the
//! in-memory pending entry first wins, and everyone else no-ops.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod orchestrator;
pub mod rate_limit;
pub mod rpc;
pub mod server;
pub mod session;

pub use error::{GatewayError, GatewayResult};
pub use orchestrator::Orchestrator;
pub use server::GatewayServer;
