//! JSON-RPC 2.0 envelopes used by every bundled transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{TetherError, TetherResult};

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Parse error (-32700)
pub const PARSE_ERROR: i64 = -32700;
/// Invalid request (-32600)
pub const INVALID_REQUEST: i64 = -32600;
/// Method not found (-32601)
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params (-32602)
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error (-32603)
pub const INTERNAL_ERROR: i64 = -32603;
/// MCP tool not found (-32001)
pub const TOOL_NOT_FOUND: i64 = -32001;
/// MCP prompt not found (-32003)
pub const PROMPT_NOT_FOUND: i64 = -32003;
/// MCP resource not found (-32004)
pub const RESOURCE_NOT_FOUND: i64 = -32004;

/// Request identifier. Requests we send always use numbers; servers may
/// echo either form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(u64),
    /// String id
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Correlation id
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// An outgoing notification (no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An incoming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Id of the request this answers (null for some parse errors)
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Build a success response (used by test servers)
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Build a failure response (used by test servers)
    pub fn failure(id: impl Into<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Extract the result, converting an error object into a categorized error.
    pub fn into_result(self) -> TetherResult<Value> {
        if let Some(err) = self.error {
            return Err(TetherError::from_rpc_error(err.code, err.message));
        }
        // A response with neither field is treated as an empty success.
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Try to interpret an arbitrary JSON value as a response to one of our requests.
///
/// Returns `None` for requests and notifications initiated by the server.
#[must_use]
pub fn parse_response(value: Value) -> Option<JsonRpcResponse> {
    let is_response = value.get("result").is_some() || value.get("error").is_some();
    if !is_response || value.get("method").is_some() {
        return None;
    }
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_serialization_omits_missing_params() {
        let req = JsonRpcRequest::new(7u64, "ping", None);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}));
    }

    #[test]
    fn test_string_ids_round_trip_through_display() {
        let id: RequestId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn test_into_result_maps_error_object() {
        let resp = JsonRpcResponse::failure(1u64, METHOD_NOT_FOUND, "Method not found");
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Tool);
    }

    #[test]
    fn test_parse_response_ignores_server_requests() {
        let server_request = json!({"jsonrpc": "2.0", "id": 1, "method": "roots/list"});
        assert!(parse_response(server_request).is_none());

        let notification = json!({"jsonrpc": "2.0", "method": "notifications/progress"});
        assert!(parse_response(notification).is_none());

        let response = json!({"jsonrpc": "2.0", "id": 3, "result": {}});
        assert_eq!(parse_response(response).unwrap().id, Some(RequestId::Number(3)));
    }
}
