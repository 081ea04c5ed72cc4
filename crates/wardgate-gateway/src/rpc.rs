//! JSON-RPC 2.0 wire types and the gateway's error-code vocabulary.
//!
//! Every frame is one JSON object with `jsonrpc: "2.0"`. Requests carry
//! `method`/`params`/`id`; responses carry `result` or `error` plus the
//! matching `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error codes: the standard trio plus gateway extensions.
pub mod code {
    /// Non-JSON frame.
    pub const PARSE_ERROR: i64 = -32700;
    /// Missing fields or failed argument validation.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unrecognized method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Approval denied by user.
    pub const USER_DENIED: i64 = -32001;
    /// Approval timed out.
    pub const TIMEOUT: i64 = -32002;
    /// Policy denied.
    pub const POLICY_DENIED: i64 = -32003;
    /// Action execution failed.
    pub const EXECUTION_FAILED: i64 = -32004;
    /// Not authenticated.
    pub const NOT_AUTHENTICATED: i64 = -32005;
    /// Rate limit exceeded.
    pub const RATE_LIMITED: i64 = -32006;
}

/// The protocol version string every frame must carry.
pub const JSONRPC_VERSION: &str = "2.0";

/// An incoming frame, parsed leniently so dispatch can distinguish a
/// malformed request (-32600) from an unknown method (-32601).
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Protocol version; must be exactly `"2.0"`.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Method name.
    #[serde(default)]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
    /// Correlation id chosen by the agent (string or number).
    #[serde(default)]
    pub id: Option<Value>,
}

impl Request {
    /// Whether the frame carries the mandatory version marker.
    #[must_use]
    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc.as_deref() == Some(JSONRPC_VERSION)
    }

    /// The correlation id as a string, for storage keys and audit rows.
    #[must_use]
    pub fn id_as_string(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// One of the [`code`] constants.
    pub code: i64,
    /// Short human-readable message. Never contains the bearer token or
    /// raw argument values.
    pub message: String,
}

/// Serialize a result frame.
#[must_use]
pub fn result_frame(id: &Value, result: Value) -> String {
    frame(id, Body::Result(result))
}

/// Serialize an error frame.
#[must_use]
pub fn error_frame(id: &Value, code: i64, message: &str) -> String {
    frame(
        id,
        Body::Error(ErrorObject {
            code,
            message: message.to_string(),
        }),
    )
}

enum Body {
    Result(Value),
    Error(ErrorObject),
}

fn frame(id: &Value, body: Body) -> String {
    #[derive(Serialize)]
    struct Frame<'a> {
        jsonrpc: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorObject>,
        id: &'a Value,
    }

    let (result, error) = match body {
        Body::Result(v) => (Some(v), None),
        Body::Error(e) => (None, Some(e)),
    };
    let frame = Frame {
        jsonrpc: JSONRPC_VERSION,
        result,
        error,
        id,
    };
    // A Frame of plain JSON values cannot fail to serialize.
    serde_json::to_string(&frame).unwrap_or_else(|_| String::from("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_code_constants() {
        assert_eq!(code::PARSE_ERROR, -32700);
        assert_eq!(code::INVALID_REQUEST, -32600);
        assert_eq!(code::METHOD_NOT_FOUND, -32601);
        assert_eq!(code::USER_DENIED, -32001);
        assert_eq!(code::TIMEOUT, -32002);
        assert_eq!(code::POLICY_DENIED, -32003);
        assert_eq!(code::EXECUTION_FAILED, -32004);
        assert_eq!(code::NOT_AUTHENTICATED, -32005);
        assert_eq!(code::RATE_LIMITED, -32006);
    }

    #[test]
    fn request_parses_with_string_or_numeric_id() {
        let r: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"auth","params":{},"id":"a"}"#)
                .unwrap();
        assert!(r.has_valid_version());
        assert_eq!(r.id_as_string().as_deref(), Some("a"));

        let r: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"auth","id":7}"#).unwrap();
        assert_eq!(r.id_as_string().as_deref(), Some("7"));
    }

    #[test]
    fn missing_version_detected() {
        let r: Request = serde_json::from_str(r#"{"method":"auth","id":1}"#).unwrap();
        assert!(!r.has_valid_version());

        let r: Request =
            serde_json::from_str(r#"{"jsonrpc":"1.0","method":"auth","id":1}"#).unwrap();
        assert!(!r.has_valid_version());
    }

    #[test]
    fn result_frame_shape() {
        let frame = result_frame(&json!(3), json!({"status": "executed"}));
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 3);
        assert_eq!(parsed["result"]["status"], "executed");
        assert!(parsed.get("error").is_none());
    }

    #[test]
    fn error_frame_shape() {
        let frame = error_frame(&json!("a"), code::POLICY_DENIED, "Policy denied");
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["error"]["code"], -32003);
        assert_eq!(parsed["error"]["message"], "Policy denied");
        assert_eq!(parsed["id"], "a");
        assert!(parsed.get("result").is_none());
    }

    #[test]
    fn non_json_is_a_parse_failure() {
        assert!(serde_json::from_str::<Request>("not json").is_err());
    }
}
