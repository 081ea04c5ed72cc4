//! Callback-data parsing and allowlist filtering.
//!
//! Kept free of Telegram I/O so the security-relevant logic is testable
//! in isolation.

use wardgate_core::ApprovalAction;

/// Prefix distinguishing approval buttons from any future callback kinds.
const CALLBACK_PREFIX: &str = "apr";

/// A decoded approval button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCallback {
    /// Correlation id of the request being decided.
    pub request_id: String,
    /// The pressed action.
    pub action: ApprovalAction,
}

/// Encode callback data for an approval button.
///
/// Telegram caps callback data at 64 bytes; the `apr:` prefix plus an
/// action token leaves room for request ids up to 53 bytes, which covers
/// UUIDs with margin.
#[must_use]
pub fn encode_callback_data(request_id: &str, action: ApprovalAction) -> String {
    format!("{CALLBACK_PREFIX}:{request_id}:{}", action.as_str())
}

/// Decode callback data. Returns `None` for anything that is not a
/// well-formed approval button press (stale buttons from older releases,
/// other handlers' data, truncated payloads).
#[must_use]
pub fn parse_callback_data(data: &str) -> Option<ParsedCallback> {
    let rest = data.strip_prefix("apr:")?;
    let (request_id, action) = rest.rsplit_once(':')?;
    if request_id.is_empty() {
        return None;
    }
    Some(ParsedCallback {
        request_id: request_id.to_string(),
        action: ApprovalAction::parse(action)?,
    })
}

/// Whether a Telegram user id is in the configured allowlist.
#[must_use]
pub fn is_allowed_user(user_id: u64, allowed_users: &[u64]) -> bool {
    allowed_users.contains(&user_id)
}
