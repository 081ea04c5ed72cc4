//! Epoch ↔ ISO-8601 conversion, confined to the storage boundary.
//!
//! Columns store fixed-width UTC timestamps (`2026-08-02T12:34:56.123456Z`)
//! so lexicographic `TEXT` comparison agrees with chronological order, which
//! the `expires_at` range scan relies on.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{StorageError, StorageResult};

/// Render epoch seconds as fixed-width ISO-8601 UTC text.
#[must_use]
pub fn epoch_to_iso(epoch: f64) -> String {
    let micros = (epoch * 1_000_000.0).round() as i64;
    let dt = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default();
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse ISO-8601 text back to epoch seconds.
///
/// # Errors
///
/// [`StorageError::Corrupt`] if the text is not a valid timestamp.
pub fn iso_to_epoch(iso: &str) -> StorageResult<f64> {
    let dt = DateTime::parse_from_rfc3339(iso)
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {iso:?}: {e}")))?;
    Ok(dt.timestamp_micros() as f64 / 1_000_000.0)
}
