//! Wardgate Storage — the durable half of the approval flow.
//!
//! One SQLite file, two tables:
//!
//! - `audit_log`: append-only record of every request outcome
//! - `pending_requests`: durable twins of in-flight `ask` approvals,
//!   doubling as the queue of results resolved while the agent was offline
//!
//! Timestamps are ISO-8601 text in columns and epoch-seconds floats
//! everywhere else; the conversion lives in [`time`] and is confined to
//! this crate.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod audit;
mod db;
mod pending;
pub mod time;

pub mod error;

pub use db::Database;
pub use error::{StorageError, StorageResult};
