//! JSON-RPC reply validation
//!
//! Both transports pass every raw reply through [`validate_reply`] before
//! handing a result to the caller. A reply is accepted only when:
//!
//! - it parses as a JSON object,
//! - `jsonrpc` is exactly `"2.0"`,
//! - `id` matches the request id,
//! - exactly one of `result` / `error` is present.
//!
//! Violations are reported as [`ParleyError::MalformedResponse`]. A
//! well-formed reply carrying `error` becomes [`ParleyError::UpstreamFailed`].

use serde_json::Value;

use crate::error::{ParleyError, Result};
use crate::mcp::types::{JsonRpcResponse, JSONRPC_VERSION};

/// Validate a raw reply line or body against the request id.
///
/// # Arguments
///
/// * `raw` - Reply text as received from the transport
/// * `expected_id` - The id sent with the request
///
/// # Returns
///
/// The `result` value of a successful reply.
///
/// # Errors
///
/// Returns `MalformedResponse` for envelope violations and `UpstreamFailed`
/// for error replies.
///
/// # Examples
///
/// ```
/// use parley::mcp::envelope::validate_reply;
///
/// let result = validate_reply(r#"{"jsonrpc":"2.0","id":"7","result":{"ok":true}}"#, "7").unwrap();
/// assert_eq!(result["ok"], true);
///
/// assert!(validate_reply(r#"{"jsonrpc":"2.0","id":"8","result":{}}"#, "7").is_err());
/// ```
pub fn validate_reply(raw: &str, expected_id: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|e| {
        ParleyError::MalformedResponse(format!("reply is not valid JSON: {}", e))
    })?;
    validate_value(value, expected_id)
}

/// Validate an already-parsed reply. See [`validate_reply`].
pub fn validate_value(value: Value, expected_id: &str) -> Result<Value> {
    if !value.is_object() {
        return Err(
            ParleyError::MalformedResponse("reply is not a JSON object".to_string()).into(),
        );
    }

    let reply: JsonRpcResponse = serde_json::from_value(value).map_err(|e| {
        ParleyError::MalformedResponse(format!("reply does not match JSON-RPC shape: {}", e))
    })?;

    match reply.jsonrpc.as_deref() {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(ParleyError::MalformedResponse(format!(
                "unexpected jsonrpc version `{}`",
                other
            ))
            .into())
        }
        None => {
            return Err(
                ParleyError::MalformedResponse("missing jsonrpc version".to_string()).into(),
            )
        }
    }

    let id = reply
        .id
        .as_ref()
        .ok_or_else(|| ParleyError::MalformedResponse("missing reply id".to_string()))?;
    let canonical = canonical_id(id).ok_or_else(|| {
        ParleyError::MalformedResponse(format!("reply id has unsupported type: {}", id))
    })?;
    if canonical != expected_id {
        return Err(ParleyError::MalformedResponse(format!(
            "reply id `{}` does not match request id `{}`",
            canonical, expected_id
        ))
        .into());
    }

    match (reply.result, reply.error) {
        (Some(result), None) => Ok(result),
        (None, Some(error)) => Err(ParleyError::UpstreamFailed {
            code: error.code,
            message: error.message,
        }
        .into()),
        (Some(_), Some(_)) => Err(ParleyError::MalformedResponse(
            "reply carries both result and error".to_string(),
        )
        .into()),
        (None, None) => Err(ParleyError::MalformedResponse(
            "reply carries neither result nor error".to_string(),
        )
        .into()),
    }
}

/// String form of an id; numbers compare equal to their decimal text.
fn canonical_id(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
