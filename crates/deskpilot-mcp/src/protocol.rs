//! JSON-RPC 2.0 framing for the MCP stdio transport.
//!
//! One JSON object per line, no batching. Requests without an `id` are
//! notifications and never get a response. The version tag is a unit type so
//! a message claiming anything but `"2.0"` fails to deserialize, and a
//! response carries exactly one of `result` or `error` by construction.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The only protocol version spoken on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

/// The `"jsonrpc": "2.0"` member. Serializes to the constant and rejects any
/// other value on the way in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag == JSONRPC_VERSION {
            Ok(Version)
        } else {
            Err(de::Error::custom(format!(
                "expected jsonrpc version '{}', got '{}'",
                JSONRPC_VERSION, tag
            )))
        }
    }
}

/// An incoming call or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: Version,
    /// `initialize`, `tools/list`, `tools/call`, `ping`, or a notification name
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `None` for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Build a call with an id. Used by in-process clients and tests.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Request {
            jsonrpc: Version,
            method: method.into(),
            params: Some(params),
            id: Some(id.into()),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Echoed back verbatim. `Null` answers messages whose id could not be read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// What a response carries: flattened into `"result": ...` or `"error": {...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: Version,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub id: RequestId,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Response {
            jsonrpc: Version,
            outcome: Outcome::Result(result),
            id,
        }
    }

    pub fn from_error(id: RequestId, err: RpcError) -> Self {
        Response {
            jsonrpc: Version,
            outcome: Outcome::Error(err.into()),
            id,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Error(err) => Some(err),
            Outcome::Result(_) => None,
        }
    }
}

/// Wire form of an [`RpcError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
}

impl From<RpcError> for ErrorObject {
    fn from(err: RpcError) -> Self {
        ErrorObject {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Protocol-level failures. Tool failures are not RPC errors; they travel
/// inside a successful `tools/call` result with `isError` set.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The line was not JSON at all.
    #[error("Parse error: {0}")]
    ParseError(String),
    /// JSON, but not a request object (wrong version, missing method, ...).
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    /// The handler itself failed, as opposed to the tool reporting an error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RpcError {
    /// Standard JSON-RPC 2.0 code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::ParseError(_) => -32700,
            RpcError::InvalidRequest(_) => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::InternalError(_) => -32603,
        }
    }
}

/// Parse one line. Valid JSON that is not a request object is
/// `InvalidRequest`; anything else is `ParseError`.
pub fn parse_request_str(text: &str) -> Result<Request, RpcError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RpcError::ParseError(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| RpcError::InvalidRequest(e.to_string()))
}

pub fn serialize_response_string(response: &Response) -> Result<String, RpcError> {
    serde_json::to_string(response).map_err(|e| RpcError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let json = r#"{"jsonrpc":"2.0","method":"tools/list","id":1}"#;
        let req = parse_request_str(json).unwrap();
        assert_eq!(req.method, "tools/list");
        assert_eq!(req.id, Some(RequestId::Number(1)));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_parse_request_with_params() {
        let json = r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"vnc_status"},"id":"abc"}"#;
        let req = parse_request_str(json).unwrap();
        assert_eq!(req.id, Some(RequestId::String("abc".to_string())));
        assert_eq!(req.params.unwrap()["name"], "vnc_status");
    }

    #[test]
    fn test_parse_notification() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let req = parse_request_str(json).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_request_str("{not json").unwrap_err().code(), -32700);
        assert_eq!(parse_request_str(r#"{"jsonrpc":"2.0"}"#).unwrap_err().code(), -32600);
        assert_eq!(parse_request_str(r#"{"method":"ping","id":1}"#).unwrap_err().code(), -32600);

        let err = parse_request_str(r#"{"jsonrpc":"1.0","method":"ping","id":1}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
        assert!(err.to_string().contains("got '1.0'"));
    }

    #[test]
    fn test_response_carries_one_outcome() {
        let ok = Response::success(RequestId::Number(7), json!({ "tools": [] }));
        let value: Value = serde_json::from_str(&serialize_response_string(&ok).unwrap()).unwrap();
        assert_eq!(value, json!({ "jsonrpc": "2.0", "result": { "tools": [] }, "id": 7 }));
        assert!(ok.error().is_none());

        let failed = Response::from_error(
            RequestId::Null,
            RpcError::MethodNotFound("unknown".to_string()),
        );
        let value: Value =
            serde_json::from_str(&serialize_response_string(&failed).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "error": { "code": -32601, "message": "Method not found: unknown" },
                "id": null
            })
        );
        assert!(failed.result().is_none());
    }
}
