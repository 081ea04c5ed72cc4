//! Epoch-seconds clock helpers.
//!
//! All in-memory timestamps are `f64` epoch seconds. ISO-8601 conversion is
//! the storage crate's job and happens nowhere else.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as epoch seconds.
#[must_use]
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
